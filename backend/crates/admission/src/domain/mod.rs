//! Domain Layer - Queue model
//!
//! This layer contains:
//! - Domain entities (QueuePosition, Admission)
//! - Domain value objects (PrincipalId)
//! - Repository traits (interfaces)

pub mod entities;
pub mod repository;
pub mod value_objects;
