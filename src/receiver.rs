//! Receiving side of the wire format.
//!
//! Decodes datagrams produced by the packetizer back into [`Record`]s. Used by
//! the `listen` subcommand and by end-to-end tests over loopback UDP.
//!
//! Each newline-terminated line is decoded on its own. A line that does not
//! parse (or a trailing fragment with no newline) is reported and skipped, and
//! the rest of the datagram is still delivered.

use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{AppResult, StreamError};
use crate::packetizer::MAX_DATAGRAM_BYTES;
use crate::sample::Record;

/// Records recovered from one datagram, plus the lines that were skipped.
#[derive(Debug, Default)]
pub struct DecodedDatagram {
    /// Well-formed records in wire order.
    pub records: Vec<Record>,
    /// One `StreamError::Decode` per rejected line.
    pub skipped: Vec<StreamError>,
}

impl DecodedDatagram {
    /// True when no line was rejected.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Decode a single record line (without its newline). `line_no` is 1-based.
pub fn decode_line(line_no: usize, line: &[u8]) -> AppResult<Record> {
    let decode_err = |reason: String| StreamError::Decode {
        line: line_no,
        reason,
    };
    let text = std::str::from_utf8(line).map_err(|e| decode_err(format!("not UTF-8: {e}")))?;
    text.parse::<Record>().map_err(decode_err)
}

/// Decode every record in one datagram, skipping lines that do not parse.
pub fn decode_datagram(payload: &[u8]) -> DecodedDatagram {
    let mut decoded = DecodedDatagram::default();
    let mut lines = payload.split(|&b| b == b'\n').enumerate().peekable();

    while let Some((i, line)) = lines.next() {
        let terminated = lines.peek().is_some();
        if !terminated {
            if !line.is_empty() {
                decoded.skipped.push(StreamError::Decode {
                    line: i + 1,
                    reason: "record not newline-terminated".to_string(),
                });
            }
            break;
        }
        match decode_line(i + 1, line) {
            Ok(record) => decoded.records.push(record),
            Err(e) => decoded.skipped.push(e),
        }
    }
    decoded
}

/// UDP listener that yields decoded records.
#[derive(Debug)]
pub struct DatagramReceiver {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl DatagramReceiver {
    /// Bind to `addr` (e.g. `0.0.0.0:5005`).
    pub async fn bind(addr: SocketAddr) -> AppResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            // Largest payload the packetizer can be configured to send.
            buf: vec![0u8; MAX_DATAGRAM_BYTES],
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for one datagram and decode it.
    ///
    /// Only socket errors are returned. Malformed lines come back in
    /// [`DecodedDatagram::skipped`].
    pub async fn recv_records(&mut self) -> AppResult<(SocketAddr, DecodedDatagram)> {
        let (len, from) = self.socket.recv_from(&mut self.buf).await?;
        let decoded = decode_datagram(&self.buf[..len]);
        debug!(
            %from,
            len,
            records = decoded.records.len(),
            skipped = decoded.skipped.len(),
            "datagram received"
        );
        Ok((from, decoded))
    }
}
