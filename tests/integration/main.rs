//! skein integration test harness.
//!
//! Each test wires two in-process endpoints — a requester and a provider —
//! through scripted message systems and moves datagrams between them by
//! hand, so packet ordering and timing are entirely under test control.
//! No sockets, no threads.

mod infra;

mod asset_flow;
mod transfer_flow;

pub use infra::*;
