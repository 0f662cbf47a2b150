//! The single-mutator scheduling contract.
//!
//! Call sites are not synchronized. Whoever holds the [`MutatorToken`] is
//! the only thread executing managed code; everyone else is parked. The
//! collector takes the same lock through [`ExecutionLock::stop_the_world`]
//! and raises a flag first, so threads asking for the token after it are
//! held back until the collection is over.

use std::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::{Condvar, Mutex, MutexGuard};

pub struct ExecutionLock<S> {
    state: Mutex<S>,
    collecting: AtomicBool,
    parked: Mutex<()>,
    resume: Condvar,
    collections: AtomicU64,
}

/// Proof that the holder is the running mutator.
pub struct MutatorToken<'a, S> {
    guard: MutexGuard<'a, S>,
}

impl<S> ExecutionLock<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
            collecting: AtomicBool::new(false),
            parked: Mutex::new(()),
            resume: Condvar::new(),
            collections: AtomicU64::new(0),
        }
    }

    /// Block until this thread may run managed code.
    pub fn acquire(&self) -> MutatorToken<'_, S> {
        if self.collecting.load(Ordering::Acquire) {
            let mut parked = self.parked.lock();
            while self.collecting.load(Ordering::Acquire) {
                self.resume.wait(&mut parked);
            }
        }
        MutatorToken {
            guard: self.state.lock(),
        }
    }

    /// Take the token if nobody holds it and no collection is pending.
    pub fn try_acquire(&self) -> Option<MutatorToken<'_, S>> {
        if self.collecting.load(Ordering::Acquire) {
            return None;
        }
        self.state.try_lock().map(|guard| MutatorToken { guard })
    }

    /// Run `collect` with every mutator stopped.
    pub fn stop_the_world<R>(&self, collect: impl FnOnce(&mut S) -> R) -> R {
        self.collecting.store(true, Ordering::Release);
        let result = {
            let mut state = self.state.lock();
            log::trace!("world stopped");
            collect(&mut state)
        };
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.collecting.store(false, Ordering::Release);
        let _parked = self.parked.lock();
        self.resume.notify_all();
        result
    }

    /// Completed stop-the-world phases.
    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> S {
        self.state.into_inner()
    }
}

impl<S> Deref for MutatorToken<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard
    }
}

impl<S> DerefMut for MutatorToken<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn token_gives_exclusive_access() {
        let lock = Arc::new(ExecutionLock::new(0u64));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut token = lock.acquire();
                        *token += 1;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        assert_eq!(Arc::try_unwrap(lock).ok().map(ExecutionLock::into_inner), Some(4000));
    }

    #[test]
    fn try_acquire_fails_while_held() {
        let lock = ExecutionLock::new(());
        let token = lock.acquire();
        assert!(lock.try_acquire().is_none());
        drop(token);
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn stop_the_world_sees_consistent_state() {
        let lock = Arc::new(ExecutionLock::new((0u64, 0u64)));
        let mutator = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let mut token = lock.acquire();
                    token.0 += 1;
                    token.1 += 1;
                }
            })
        };
        for _ in 0..50 {
            let (a, b) = lock.stop_the_world(|state| *state);
            assert_eq!(a, b);
        }
        mutator.join().expect("mutator panicked");
        assert_eq!(lock.collections(), 50);
        assert_eq!(lock.stop_the_world(|state| state.0), 1000);
    }
}
