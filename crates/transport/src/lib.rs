//! Transport seam for the Tether connection manager.
//!
//! Defines the closed set of lifecycle events a transport reports, the
//! session handle the manager owns, and a WebSocket transport that carries
//! its own reconnection loop.

pub mod constants;
pub mod event;
mod pumps;
pub mod session;
pub mod ws;

pub use event::{TransportEvent, is_manual_disconnect};
pub use session::{Opened, SendError, Session, Transport, TransportOptions};
pub use ws::{WsOptions, WsTransport};
