//! Per-connection I/O tasks for the WebSocket transport.

pub(crate) mod outbound;
pub(crate) mod read;
