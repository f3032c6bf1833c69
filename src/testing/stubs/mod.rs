pub mod manual_clock;
pub mod memory_store;

pub use manual_clock::ManualClock;
pub use memory_store::MemoryStore;
