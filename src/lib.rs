//! Purpose: Engine-side dRPC bridge to the co-located control-plane daemon.
//! Exports: `api` (session and operations), `config`, `core` (envelopes, transport, errors).
//! Role: Library backing the `drpc-bridge` CLI and embedding engines.
//! Invariants: Every call-scoped allocation is released exactly once on every path.
//! Invariants: Connection state lives in an explicit session object, never in globals.
pub mod api;
pub mod config;
pub mod core;
