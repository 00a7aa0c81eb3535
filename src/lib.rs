//! A single P2P file-sharing peer: indexes a shared directory, gossips with
//! a small set of neighbours over a plain HTTP control surface, and streams
//! file contents over a chunked transfer surface. See `SPEC_FULL.md` for the
//! full module breakdown ([C1]-[C7]) and `DESIGN.md` for how each module
//! maps back onto this crate's teacher.

pub mod app_state;
pub mod client;
pub mod config;
pub mod health;
pub mod indexer;
pub mod metrics;
pub mod peer_state;
pub mod server;
pub mod supervisor;
pub mod tracing_init;
