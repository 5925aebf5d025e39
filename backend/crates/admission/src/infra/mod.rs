//! Infrastructure Layer - Store-backed repository

pub mod store;
