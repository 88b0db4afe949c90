
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::TransportError;

/// Vertical-tab, opens an MLLP block.
pub const START_BLOCK: u8 = 0x0B;
/// File-separator + carriage return, closes an MLLP block.
pub const END_BLOCK: [u8; 2] = [0x1C, 0x0D];

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const BUFFER_SIZE: usize = 1024;

/// Where MLLP messages are sent. Nothing is validated until connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Wraps a message in an MLLP envelope: `0x0B <message> 0x1C 0x0D`.
pub fn frame(message: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(message.len() + 3);
    framed.push(START_BLOCK);
    framed.extend_from_slice(message);
    framed.extend_from_slice(&END_BLOCK);
    framed
}

/// Strips every leading and trailing envelope byte from a received block.
pub fn unframe(bytes: &[u8]) -> &[u8] {
    let is_marker = |b: &u8| *b == START_BLOCK || END_BLOCK.contains(b);
    let start = bytes
        .iter()
        .position(|b| !is_marker(b))
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !is_marker(b))
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn contains_end_block(buffer: &[u8]) -> bool {
    buffer.windows(END_BLOCK.len()).any(|w| w == END_BLOCK)
}

/// A single request/response exchange with an HL7 receiver.
pub trait Transport {
    fn send(&mut self, message: &str) -> Result<String, TransportError>;
}

/// Blocking MLLP client. Opens a fresh connection for every message.
/// Host name resolution happens on every send and is not bound by `timeout`.
#[derive(Debug, Clone)]
pub struct MllpClient {
    endpoint: Endpoint,
    timeout: Duration,
}

impl MllpClient {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    fn connect(&self) -> Result<TcpStream, TransportError> {
        let addrs: Vec<SocketAddr> = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Resolve {
                endpoint: self.endpoint.to_string(),
                source: Some(e),
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            debug!(%addr, "connecting");
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) if is_timeout(&e) => Err(TransportError::Timeout(self.timeout)),
            Some(e) => Err(TransportError::Connect {
                endpoint: self.endpoint.to_string(),
                source: e,
            }),
            None => Err(TransportError::Resolve {
                endpoint: self.endpoint.to_string(),
                source: None,
            }),
        }
    }

    fn classify(&self, e: io::Error) -> TransportError {
        if is_timeout(&e) {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Io(e)
        }
    }
}

impl Transport for MllpClient {
    fn send(&mut self, message: &str) -> Result<String, TransportError> {
        let mut stream = self.connect()?;

        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let framed = frame(message.as_bytes());
        stream.write_all(&framed).map_err(|e| self.classify(e))?;
        stream.flush().map_err(|e| self.classify(e))?;
        debug!(bytes = framed.len(), endpoint = %self.endpoint, "message sent");

        // Many listeners keep the socket open, so stop at the end marker
        // rather than waiting for the peer to close.
        let mut buffer = Vec::new();
        let mut chunk = [0; BUFFER_SIZE];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    trace!(bytes = n, "received chunk");
                    buffer.extend_from_slice(&chunk[..n]);
                    if contains_end_block(&buffer) {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.classify(e)),
            }
        }
        debug!(bytes = buffer.len(), "response received");

        let response = String::from_utf8(unframe(&buffer).to_vec())?;
        Ok(response)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Sends one message to `endpoint` and returns the unframed response.
///
/// `timeout` bounds the connect, the write and each read. Resolving the host
/// name is a blocking lookup that `timeout` does not cover.
pub fn send(
    message: &str,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<String, TransportError> {
    MllpClient::new(endpoint.clone(), timeout).send(message)
}
