//! Minimal STOMP client for progress publishing
//!
//! Only what a progress feed needs: CONNECT, SEND and DISCONNECT over a
//! plain TCP connection. Frames follow STOMP 1.2:
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! \n
//! body\0
//! ```

use crate::config::StompSettings;
use crate::error::{Result, SnapError};
use crate::progress::Publisher;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// Timeout for connecting and for each frame exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A decoded STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command
    pub command: String,
    /// Headers in wire order
    pub headers: Vec<(String, String)>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl Frame {
    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn escapes_headers(command: &str) -> bool {
    command != "CONNECT" && command != "CONNECTED"
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Encode a frame, including the terminating NUL
pub fn encode_frame(command: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let escape = escapes_headers(command);
    let mut out = Vec::with_capacity(command.len() + body.len() + 64);
    out.extend_from_slice(command.as_bytes());
    out.push(b'\n');
    for (name, value) in headers {
        if escape {
            out.extend_from_slice(escape_header(name).as_bytes());
            out.push(b':');
            out.extend_from_slice(escape_header(value).as_bytes());
        } else {
            out.extend_from_slice(name.as_bytes());
            out.push(b':');
            out.extend_from_slice(value.as_bytes());
        }
        out.push(b'\n');
    }
    out.push(b'\n');
    out.extend_from_slice(body);
    out.push(0);
    out
}

/// Decode a frame whose terminating NUL has already been stripped
pub fn decode_frame(raw: &[u8]) -> std::result::Result<Frame, String> {
    let start = raw
        .iter()
        .position(|&b| b != b'\n' && b != b'\r')
        .ok_or_else(|| "empty frame".to_string())?;
    let raw = &raw[start..];

    let mut pos = 0;
    let mut lines = Vec::new();
    loop {
        let end = raw[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .ok_or_else(|| "frame has no header terminator".to_string())?;
        let line = std::str::from_utf8(&raw[pos..end])
            .map_err(|e| format!("frame header is not UTF-8: {}", e))?
            .trim_end_matches('\r');
        pos = end + 1;
        if line.is_empty() {
            break;
        }
        lines.push(line.to_string());
    }

    let mut lines = lines.into_iter();
    let command = lines.next().ok_or_else(|| "frame has no command".to_string())?;
    let escape = escapes_headers(&command);

    let headers = lines
        .map(|line| {
            let (k, v) = line.split_once(':').unwrap_or((line.as_str(), ""));
            if escape {
                (unescape_header(k), unescape_header(v))
            } else {
                (k.to_string(), v.to_string())
            }
        })
        .collect();

    Ok(Frame {
        command,
        headers,
        body: raw[pos..].to_vec(),
    })
}

/// Connected STOMP session
pub struct StompClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    server: String,
}

impl StompClient {
    /// Connect and log in to the broker
    pub fn connect(settings: &StompSettings) -> Result<Self> {
        Self::connect_with_timeout(settings, DEFAULT_TIMEOUT)
    }

    /// Connect with a custom timeout
    pub fn connect_with_timeout(settings: &StompSettings, timeout: Duration) -> Result<Self> {
        let address = settings.address();
        let unreachable = |e: std::io::Error| {
            SnapError::config(format!("cannot connect to stomp server {}: {}", address, e))
        };

        let mut last_err = None;
        let mut stream = None;
        for addr in address.to_socket_addrs().map_err(unreachable)? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(unreachable(e)),
            (None, None) => {
                return Err(SnapError::config(format!("stomp server {} did not resolve", address)))
            }
        };

        stream.set_read_timeout(Some(timeout)).map_err(unreachable)?;
        stream.set_write_timeout(Some(timeout)).map_err(unreachable)?;
        stream.set_nodelay(true).map_err(unreachable)?;

        let reader = BufReader::new(stream.try_clone().map_err(unreachable)?);
        let mut client = Self {
            reader,
            writer: BufWriter::new(stream),
            server: address.clone(),
        };

        let connect = encode_frame(
            "CONNECT",
            &[
                ("accept-version", "1.0,1.1,1.2"),
                ("host", settings.server.as_str()),
                ("login", settings.user.as_str()),
                ("passcode", settings.password.as_str()),
                ("heart-beat", "0,0"),
            ],
            b"",
        );
        client.send_raw(&connect).map_err(unreachable)?;

        let reply = client.read_frame().map_err(SnapError::config)?;
        match reply.command.as_str() {
            "CONNECTED" => {
                info!(
                    version = reply.header("version").unwrap_or("1.0"),
                    "Connected to stomp server {}",
                    address
                );
                Ok(client)
            }
            "ERROR" => Err(SnapError::config(format!(
                "stomp server {} refused login: {}",
                address,
                reply.header("message").unwrap_or("no reason given")
            ))),
            other => Err(SnapError::config(format!(
                "unexpected {} frame from stomp server {}",
                other, address
            ))),
        }
    }

    fn send_raw(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()
    }

    fn read_frame(&mut self) -> std::result::Result<Frame, String> {
        let mut raw = Vec::new();
        let n = self
            .reader
            .read_until(0, &mut raw)
            .map_err(|e| format!("reading from {}: {}", self.server, e))?;
        if n == 0 {
            return Err(format!("{} closed the connection", self.server));
        }
        if raw.last() == Some(&0) {
            raw.pop();
        }
        decode_frame(&raw)
    }

    /// Send a text message to a destination
    pub fn send(&mut self, destination: &str, body: &str) -> Result<()> {
        let length = body.len().to_string();
        let frame = encode_frame(
            "SEND",
            &[
                ("destination", destination),
                ("content-type", "text/plain; charset=utf-8"),
                ("content-length", length.as_str()),
            ],
            body.as_bytes(),
        );
        self.send_raw(&frame)
            .map_err(|e| SnapError::Publish(format!("sending to {} on {}: {}", destination, self.server, e)))
    }

    /// Say goodbye to the broker
    pub fn disconnect(&mut self) {
        let frame = encode_frame("DISCONNECT", &[], b"");
        if let Err(e) = self.send_raw(&frame) {
            debug!("Disconnect from {} failed: {}", self.server, e);
        }
    }
}

impl Publisher for StompClient {
    fn publish(&mut self, channel: &str, message: &str) -> Result<()> {
        self.send(channel, message)
    }

    fn close(&mut self) {
        self.disconnect();
    }
}
