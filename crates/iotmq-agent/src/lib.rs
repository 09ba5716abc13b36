//! iotmq agent library crate for the edge binary.
//!
//! Re-exports all modules so external crates (e.g. `iotmq-e2e-tests`) can
//! drive the agent's session and heartbeat against a mock transport.

pub mod config;
pub mod heartbeat;
pub mod session;
