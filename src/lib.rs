//! equeue-sim library
//!
//! Discrete-event simulation for asynchronous, heterogeneous dataflow
//! graphs: memories, DMAs and processors exchange dataflow signals
//! while a single virtual clock jumps between completion events, and
//! every op execution lands in a Chrome-tracing profile.
//!
//! # Module Organization
//!
//! - [`ir`]: In-memory dataflow IR and the graph builder
//! - [`device`]: Device registry, per-device schedules, cost models
//! - [`sim`]: Launcher tables, signal readiness oracle, event loop
//! - [`trace`]: Chrome-tracing sink and JSON writer
//! - [`config`]: Cost-model configuration (toml + env)
//! - [`demos`]: Built-in demo graphs for the CLI

pub mod config;
pub mod demos;
pub mod device;
pub mod ir;
pub mod sim;
pub mod trace;
