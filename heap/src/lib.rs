mod heap;

pub use heap::{
    BarrierStats, Evacuation, EvacuationStats, Heap, HeapSettings, RootProvider,
    RootSet,
};
