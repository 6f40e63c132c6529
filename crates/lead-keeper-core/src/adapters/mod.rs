//! # Storage Adapters
//!
//! Implementations of the storage ports.

pub mod memory_store;

pub use memory_store::MemoryCrmStore;
