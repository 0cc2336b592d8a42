//! Client for the canvas snapshot relay.

pub mod canvas;
pub mod client;

pub use client::{ClientError, RelayClient, SnapshotSink};
