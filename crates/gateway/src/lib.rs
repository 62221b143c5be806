//! Command bridge between the orchestrator's text protocol and a WhatsApp
//! session.
//!
//! Input frames are parsed and run on a bounded task pool; every result and
//! platform event goes through one output writer.

pub mod bridge;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod handlers;
pub mod tasks;

pub use {
    bridge::Bridge,
    dispatcher::Dispatcher,
    emitter::{OutputWriter, spawn_output},
    error::{Error, Result},
    handlers::Handlers,
    tasks::{TaskInfo, TaskPool},
};
