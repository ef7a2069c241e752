//! Integration Tests
//!
//! Cross-layer tests through the public `turfdb` API:
//! - Storage mode: persistent vs ephemeral
//! - Workflow: collections, extensions and observers together
//! - Scale: thousands of values with bounded caches

#[path = "../common/mod.rs"]
mod common;

mod modes;
mod scale;
mod workflow;
