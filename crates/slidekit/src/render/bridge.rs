//! Client for the long-lived rendering engine bridge.
//!
//! The bridge is a helper process holding a live LibreOffice instance. It
//! speaks line-delimited JSON over TCP: one request object per line, one
//! response object per line.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Cannot connect to rendering bridge at {address}: {message}")]
    Connect { address: String, message: String },

    #[error("Bridge IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bridge request timed out")]
    Timeout,

    #[error("Bridge connection dropped")]
    Disconnected,

    #[error("Bridge reported: {0}")]
    Remote(String),

    #[error("Bridge protocol violation: {0}")]
    Protocol(String),
}

impl BridgeError {
    /// Whether the session is unusable after this error.
    ///
    /// A timed-out or garbled exchange leaves an unread reply on the stream,
    /// so only errors the bridge reported itself keep the session alive.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BridgeError::Remote(_) | BridgeError::Connect { .. })
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Open { path: &'a str },
    Render { slide: u32, output: &'a str },
    Close,
    Ping,
}

#[derive(Debug, Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Opens sessions against the bridge.
pub trait BridgeConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn BridgeSession>, BridgeError>;
}

/// One connection to the bridge with at most one open document.
pub trait BridgeSession: Send {
    fn open(&mut self, document: &Path) -> Result<(), BridgeError>;

    /// Renders one slide of the open document to `output` as SVG.
    fn render_slide(&mut self, slide_number: u32, output: &Path) -> Result<(), BridgeError>;

    fn close(&mut self) -> Result<(), BridgeError>;

    fn ping(&mut self) -> Result<(), BridgeError>;
}

pub struct TcpBridgeConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpBridgeConnector {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl BridgeConnector for TcpBridgeConnector {
    fn connect(&self) -> Result<Box<dyn BridgeSession>, BridgeError> {
        let address = self.address();
        let connect_error = |message: String| BridgeError::Connect {
            address: address.clone(),
            message,
        };

        let addrs = address
            .to_socket_addrs()
            .map_err(|e| connect_error(e.to_string()))?;

        let mut last_error = "no addresses resolved".to_string();
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    let mut session = TcpBridgeSession::new(stream)?;
                    session.ping()?;
                    return Ok(Box::new(session));
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        Err(connect_error(last_error))
    }
}

pub struct TcpBridgeSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TcpBridgeSession {
    pub fn new(stream: TcpStream) -> Result<Self, BridgeError> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn call(&mut self, request: &Request<'_>) -> Result<(), BridgeError> {
        let mut line =
            serde_json::to_string(request).map_err(|e| BridgeError::Protocol(e.to_string()))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).map_err(map_io)?;
        self.writer.flush().map_err(map_io)?;

        let mut reply = String::new();
        let read = self.reader.read_line(&mut reply).map_err(map_io)?;
        if read == 0 {
            return Err(BridgeError::Disconnected);
        }

        let response: Response = serde_json::from_str(reply.trim_end())
            .map_err(|e| BridgeError::Protocol(format!("{}: {:?}", e, reply.trim_end())))?;
        if response.ok {
            Ok(())
        } else {
            Err(BridgeError::Remote(
                response
                    .error
                    .unwrap_or_else(|| "unspecified error".to_string()),
            ))
        }
    }
}

fn map_io(e: std::io::Error) -> BridgeError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => BridgeError::Timeout,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => BridgeError::Disconnected,
        _ => BridgeError::Io(e),
    }
}

fn path_str(path: &Path) -> Result<&str, BridgeError> {
    path.to_str()
        .ok_or_else(|| BridgeError::Protocol(format!("non UTF-8 path: {}", path.display())))
}

impl BridgeSession for TcpBridgeSession {
    fn open(&mut self, document: &Path) -> Result<(), BridgeError> {
        let path = path_str(document)?;
        self.call(&Request::Open { path })
    }

    fn render_slide(&mut self, slide_number: u32, output: &Path) -> Result<(), BridgeError> {
        let output = path_str(output)?;
        self.call(&Request::Render {
            slide: slide_number,
            output,
        })
    }

    fn close(&mut self) -> Result<(), BridgeError> {
        self.call(&Request::Close)
    }

    fn ping(&mut self) -> Result<(), BridgeError> {
        self.call(&Request::Ping)
    }
}
