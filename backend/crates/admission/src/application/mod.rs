//! Application Layer - Use Cases
//!
//! Orchestrates the queue repository and the distributed lock.

pub mod config;
pub mod virtual_queue;
