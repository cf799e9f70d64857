//! # jnova-client
//!
//! Diagnostic client for jnova line/command servers.
//!
//! This crate provides:
//! - A TCP connection with independent send and receive halves
//! - Client sessions running concurrent inbound and outbound duties
//!   (keep-alive, backpressure burst, one-shot broadcast)
//! - One-shot framing probes (newline delimiter, length prefix)

pub mod connection;
pub mod error;
pub mod probe;
pub mod session;

pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use probe::{Probe, ProbeReport};
pub use session::{
    OutboundPlan, Session, SessionConfig, SessionEvent, SessionState, SessionSummary,
    TerminationReason,
};
