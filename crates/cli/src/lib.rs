//! hookbus CLI
//!
//! Command-line interface for dispatching steps to engines and inspecting
//! the blackboard and events of a running bus.

pub mod client;
pub mod commands;
pub mod output;
