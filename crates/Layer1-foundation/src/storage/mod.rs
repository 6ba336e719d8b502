//! Storage module for dockyard
//!
//! - `json`: JSON files under a base directory, written atomically

mod json;

pub use json::JsonStore;
