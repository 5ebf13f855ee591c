//! Transport implementations.
//!
//! - [`tcp::TcpTransport`]: raw SCPI over TCP sockets
//! - [`simulated::SimulatedTransport`]: in-memory sessions for tests and dry runs

pub mod simulated;
pub mod tcp;

pub use simulated::{SimulatedTransport, TransportEvent};
pub use tcp::TcpTransport;
