//! Core of a client for a streaming analytical query engine ("Hyper"):
//! an adaptive result iterator that multiplexes the execute, status and
//! chunk-fetch RPC streams behind a single `next()` call, plus the range
//! paginators and status poller that let callers resume a persisted result
//! from an arbitrary offset.
//!
//! This crate does not perform authentication, does not parse or optimize
//! SQL, and does not decode the columnar batches it returns — it hands
//! opaque [`pb::QueryResult`] payloads to whatever decoder the caller
//! supplies.

pub mod config;
pub mod deadline;
pub mod error;
pub mod fsm;
pub mod gateway;
pub mod handle;
pub mod observer;
pub mod paginator;
pub mod poller;
pub mod status;
pub mod sync_iter;

/// Generated protobuf/gRPC bindings for the `hyperdb.v1` service.
pub mod pb {
    tonic::include_proto!("hyperdb.v1");
}

pub use config::{Config, ConfigBuilder};
pub use deadline::Deadline;
pub use error::{Error, Result, StateLabel};
pub use gateway::Gateway;
pub use handle::{HyperClient, QueryHandle};
pub use status::{CompletionStatus, QueryStatus};
