//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations for admission control:
//! - Remote ordered store contract with Redis and in-memory backends
//! - Distributed lock manager (TTL-bounded, token-checked release)
//! - Per-principal rate limiting (fixed window and token bucket)
//! - Environment configuration helpers
//! - Random token generation

pub mod config;
pub mod crypto;
pub mod lock;
pub mod rate_limit;
pub mod store;
