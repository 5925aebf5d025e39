//! Presentation Layer
//!
//! HTTP adapters of the caller-facing queue contract.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod router;
