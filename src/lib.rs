//! Multiplexing proxy for the Language Server Protocol.
//!
//! One editor client speaks LSP to the proxy over stdio as if to a single
//! language server; behind it, requests fan out to several child servers
//! whose responses are merged: capabilities union at `initialize`,
//! completion lists concatenate, and diagnostics consolidate across
//! backends with per-source attribution.

pub mod backend;
pub mod cli;
pub mod diagnostics;
pub mod endpoint;
pub mod merge;
pub mod protocol;
pub mod proxy;
pub mod supervisor;
pub mod transport;
