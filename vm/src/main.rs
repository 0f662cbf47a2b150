use std::{process, thread};

use clap::Parser as ClapParser;
use garnet::{
    Arguments, CodeInfo, CompiledCode, EntryPoint, ExecutionLock, LookupKind, SendSite,
    simulation::Simulation,
};
use garnet_heap::{EvacuationStats, Heap, HeapSettings, RootProvider};
use garnet_object::{Header, Tracer, Value};
use log::LevelFilter;

/// The instruction pointer of the simulated send.
const SEND_IP: u32 = 0;

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Drive a call site through a sequence of receiver classes")]
struct Cli {
    /// Receiver classes in call order
    #[arg(short, long, value_delimiter = ',', default_value = "A,B,A,C,A")]
    classes: Vec<String>,

    /// How many times the sequence is replayed
    #[arg(short, long, default_value_t = 1)]
    rounds: usize,

    /// Threads taking turns on the execution lock
    #[arg(short, long, default_value_t = 1)]
    workers: usize,

    /// Stop the world after every round, move the call-site caches and
    /// trace the code
    #[arg(long)]
    evacuate: bool,

    /// Selector sent at the call site
    #[arg(long, default_value = "call")]
    selector: String,

    /// Age at which objects count as old for the write barrier
    #[arg(long, default_value_t = 1)]
    tenure_age: u8,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Receivers of the replayed sequence. They are the GC roots of a round.
struct Receivers(Vec<Value>);

impl RootProvider for Receivers {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for receiver in self.0.iter_mut() {
            visitor(receiver);
        }
    }
}

struct World {
    sim: Simulation,
    code: CompiledCode,
    receivers: Receivers,
}

struct Collection {
    roots: usize,
    remembered: usize,
    stats: EvacuationStats,
}

fn build_world(cli: &Cli) -> World {
    let heap = Heap::new(HeapSettings {
        tenure_age: cli.tenure_age,
        ..Default::default()
    });
    let mut sim = Simulation::with_heap(heap);

    let mut class_names: Vec<&str> = cli.classes.iter().map(String::as_str).collect();
    class_names.sort_unstable();
    class_names.dedup();
    let classes: Vec<(&str, Value)> = class_names
        .iter()
        .enumerate()
        .map(|(i, &name)| {
            let class = sim.define_class(name);
            sim.define_method(class, &cli.selector, i as i64);
            (name, class)
        })
        .collect();

    let receivers = cli
        .classes
        .iter()
        .filter_map(|name| classes.iter().find(|(n, _)| *n == name.as_str()))
        .map(|&(_, class)| sim.instantiate(class))
        .collect();

    let name = sim.symbols.intern("main");
    let selector = sim.symbols.intern(&cli.selector);
    let mut info = CodeInfo::new(name, sim.symbols.intern("<cli>"), vec![0; 4]);
    info.sends.push(SendSite {
        ip: SEND_IP,
        name: selector,
        fallback: LookupKind::Normal,
    });
    let mut code = CompiledCode::create(info, &mut sim);
    code.set_unspecialized(EntryPoint::INTERPRETER);

    World {
        sim,
        code,
        receivers: Receivers(receivers),
    }
}

/// Headers of `code` and everything it owns by value.
fn owned_headers(code: &CompiledCode) -> Vec<&Header> {
    let mut headers = vec![&code.header, &code.literals().header, &code.local_names().header];
    for site in code.call_sites() {
        headers.push(&site.header);
        if let Some(mono) = site.mono() {
            headers.extend([&mono.header, &mono.entry().header]);
        }
        if let Some(poly) = site.poly() {
            headers.push(&poly.header);
            headers.extend(poly.entries().map(|entry| &entry.header));
        }
    }
    headers
}

/// The caches and entries the collector moves in a collection.
fn cache_objects(code: &CompiledCode) -> Vec<Value> {
    let mut objects = Vec::new();
    for site in code.call_sites() {
        if let Some(mono) = site.mono() {
            objects.extend([mono.identity(), mono.entry().identity()]);
        }
        if let Some(poly) = site.poly() {
            objects.push(poly.identity());
            objects.extend(poly.entries().map(|entry| entry.identity()));
        }
    }
    objects
}

/// One stop-the-world collection: mark the receivers, move every cache,
/// trace the code so its fields follow, then age what survived.
fn collect(world: &mut World) -> Collection {
    let World {
        sim,
        code,
        receivers,
    } = world;
    let inputs = sim.heap.collect_gc_inputs(receivers);
    let moving = cache_objects(code);

    let mut evacuation = sim.heap.evacuate();
    for &root in &inputs.roots {
        evacuation.mark(root);
    }
    for &object in &moving {
        evacuation.relocate(object);
    }
    evacuation.trace(code);
    evacuation.update_roots(receivers);
    let stats = evacuation.finish();

    for header in owned_headers(code) {
        sim.heap.clear_remembered_flag(header);
        sim.heap.age_survivor(header);
    }
    Collection {
        roots: inputs.roots.len(),
        remembered: inputs.remember.len(),
        stats,
    }
}

fn send(world: &mut World, receiver: Value) -> Result<Value, String> {
    let World { sim, code, .. } = world;
    let site = code
        .call_site_at_mut(SEND_IP)
        .ok_or_else(|| format!("no call site at ip {SEND_IP}"))?;
    let mut args = Arguments::new(site.name(), receiver, Vec::new());
    site.execute(sim, &mut args).map_err(|err| err.to_string())
}

fn run_round(lock: &ExecutionLock<World>, worker: usize, workers: usize) -> Result<(), String> {
    let len = lock.acquire().receivers.0.len();
    for index in (worker..len).step_by(workers) {
        let mut world = lock.acquire();
        let receiver = world.receivers.0[index];
        let result = send(&mut world, receiver)?;
        log::debug!("worker {worker}: call {} -> {result:?}", index + 1);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    let workers = cli.workers.max(1);
    let lock = ExecutionLock::new(build_world(&cli));

    for round in 0..cli.rounds {
        let outcome: Result<(), String> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let lock = &lock;
                    scope.spawn(move || run_round(lock, worker, workers))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|_| Err("worker panicked".into())))
                .collect()
        });
        if let Err(err) = outcome {
            eprintln!("round {}: {err}", round + 1);
            process::exit(1);
        }

        if cli.evacuate {
            let collection = lock.stop_the_world(collect);
            println!(
                "round {}: {} roots, {} remembered, traced {} objects, {} fields rewritten",
                round + 1,
                collection.roots,
                collection.remembered,
                collection.stats.marked,
                collection.stats.relocated
            );
        }
    }

    let world = lock.acquire();
    if let Some(site) = world.code.call_site_at(SEND_IP) {
        print!("{}", site.describe(&world.sim));
        println!("state: {:?}", site.state());
    }
    let stats = world.sim.stats;
    let barriers = world.sim.heap.barrier_stats();
    println!(
        "resolutions: {}\nexecutions: {}\nbarriers: {} ({} remembered)",
        stats.resolutions, stats.executions, barriers.barriers, barriers.remembered
    );
}
