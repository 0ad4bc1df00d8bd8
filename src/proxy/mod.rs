//! Reverse proxy core
//!
//! This module implements backend representation, liveness probing,
//! round-robin selection, and request forwarding.

pub mod backend;
pub mod balancer;
pub mod selector;

pub use backend::{Backend, HttpBackend};
pub use balancer::Balancer;
pub use selector::Selector;
