//! Layered configuration merging.

pub mod service;
