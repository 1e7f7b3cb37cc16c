//! # anyvm Server
//!
//! HTTP front end for the provider dispatcher. The binary in `main.rs` wires
//! these modules together; they are exposed as a library for integration
//! tests.

pub mod cli;
pub mod config;
pub mod http_server;
pub mod server;
