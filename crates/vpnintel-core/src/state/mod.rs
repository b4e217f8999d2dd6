// # Store Implementations
//
// In-process implementation of the VpnStore trait. The durable SQLite
// backend lives in its own crate.

pub mod memory;

pub use memory::MemoryStore;
