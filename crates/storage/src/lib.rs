//! Storage layer for Turf
//!
//! This crate implements the row store behind the engine's store boundary:
//! - MemoryStore: copy-on-write tables with lock-free point-in-time reads
//! - MemoryBatch: buffered writes that read their own writes
//! - Optional file persistence with atomic replace and CRC32 check

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
mod persist;

pub use memory::{MemoryBatch, MemoryPrepared, MemorySnapshot, MemoryStore, SyncMode};
