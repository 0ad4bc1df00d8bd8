//! Rotor - Round-Robin Reverse Proxy
//!
//! Core library for backend selection and request forwarding.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
