//! One-shot framing probes.
//!
//! A probe connects, sends one framed payload, reads exactly one framed
//! response with the same framing, and closes. Any failure aborts the probe.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use bytes::{Bytes, BytesMut};
use jnova_protocol::Framing;
use std::borrow::Cow;

/// Outcome of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub framing: Framing,
    /// Bytes written, framing overhead included.
    pub bytes_sent: usize,
    /// Decoded response payload.
    pub response: Bytes,
}

impl ProbeReport {
    /// Response payload as text, with invalid UTF-8 replaced.
    pub fn response_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.response)
    }
}

/// A request/response exchange using one framing strategy.
pub struct Probe {
    config: ConnectionConfig,
    framing: Framing,
}

impl Probe {
    pub fn new(config: ConnectionConfig, framing: Framing) -> Self {
        Self { config, framing }
    }

    /// Probe using newline-delimited framing.
    pub fn line(config: ConnectionConfig) -> Self {
        Self::new(config, Framing::line())
    }

    /// Probe using 4-byte length-prefixed framing.
    pub fn length_prefixed(config: ConnectionConfig) -> Self {
        Self::new(config, Framing::length_prefixed())
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Runs the probe with `payload`.
    pub async fn run(&self, payload: &[u8]) -> Result<ProbeReport, ClientError> {
        // Encode first so a bad payload never opens a connection
        let request = self.framing.encode(payload)?;

        let conn = Connection::new(self.config.clone());
        conn.connect().await?;
        tracing::info!("Connected to {} ({})", self.config.addr(), self.framing);

        let result = self.exchange(&conn, &request).await;
        conn.close().await;
        result
    }

    async fn exchange(
        &self,
        conn: &Connection,
        request: &[u8],
    ) -> Result<ProbeReport, ClientError> {
        conn.send_all(request).await?;
        tracing::debug!("Probe request sent ({} bytes)", request.len());

        let mut buf = BytesMut::new();
        let response = conn.read_frame(&self.framing, &mut buf).await?;
        tracing::debug!("Probe response received ({} bytes)", response.len());

        Ok(ProbeReport {
            framing: self.framing,
            bytes_sent: request.len(),
            response,
        })
    }
}
