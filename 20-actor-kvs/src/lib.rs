//! In-process key-value store served over HTTP and a JSON line protocol.
//!
//! The store itself is a single worker task that owns the map; everything else
//! reaches it through message passing:
//!
//! - [`id`] mints and validates the random 128-bit keys.
//! - [`engine`] runs the worker and hands out cloneable [`engine::StoreHandle`]s
//!   whose `get`/`set`/`update`/`delete` calls are linearized through one
//!   intake channel.
//! - [`metrics`] keeps the size and operation counters in their own task.
//! - [`protocol`] and [`tcp`] implement the newline-delimited JSON interface.
//! - [`http`] maps the REST routes onto the store with `axum`.
//! - [`supervisor`] starts and stops all of the above in order; [`cli`] holds
//!   its command-line configuration.

pub mod cli;
pub mod engine;
pub mod error;
pub mod http;
pub mod id;
pub mod metrics;
pub mod protocol;
pub mod supervisor;
pub mod tcp;
