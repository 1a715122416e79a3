// # State Store Implementations
//
// This module provides implementations of the StateStore and EpisodeStore
// traits for different persistence strategies. Each implementation holds
// current states and offline episodes together behind one lock.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
