// src/nats/codec.rs
//! Minimal NATS text protocol subset: CONNECT, PUB and PONG out; INFO, PING,
//! PONG, +OK and -ERR in. Frames are CRLF terminated.

use serde::Serialize;

use crate::error::ProtocolError;

pub const CRLF: &str = "\r\n";

/// Options sent in the CONNECT handshake.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectOptions {
    pub verbose: bool,
    pub pedantic: bool,
    pub tls_required: bool,
    pub name: String,
    pub lang: String,
    pub version: String,
}

impl ConnectOptions {
    /// Handshake options carrying the given client name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            verbose: false,
            pedantic: false,
            tls_required: false,
            name: name.into(),
            lang: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::with_name("feed-relay")
    }
}

/// Operations the server may send us.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerOp {
    Info(serde_json::Value),
    Ping,
    Pong,
    Ok,
    Err(String),
}

pub fn encode_connect(opts: &ConnectOptions) -> String {
    // Serializing a struct of plain strings/bools cannot fail.
    let json = serde_json::to_string(opts).unwrap_or_else(|_| "{}".to_string());
    format!("CONNECT {json}{CRLF}")
}

pub fn encode_pong() -> String {
    format!("PONG{CRLF}")
}

/// `PUB <subject> <#bytes>\r\n<payload>\r\n`. The length is the UTF-8 byte
/// length of `payload`, not its char count.
pub fn encode_pub(subject: &str, payload: &str) -> Result<String, ProtocolError> {
    validate_subject(subject)?;
    Ok(format!(
        "PUB {subject} {len}{CRLF}{payload}{CRLF}",
        len = payload.len()
    ))
}

pub fn validate_subject(subject: &str) -> Result<(), ProtocolError> {
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return Err(ProtocolError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

/// Parse a single control line (without the trailing CRLF).
pub fn parse_line(line: &str) -> Result<ServerOp, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let (op, rest) = match line.split_once(char::is_whitespace) {
        Some((op, rest)) => (op, rest.trim()),
        None => (line, ""),
    };

    match op.to_ascii_uppercase().as_str() {
        "INFO" => serde_json::from_str(rest)
            .map(ServerOp::Info)
            .map_err(|e| ProtocolError::MalformedInfo(e.to_string())),
        "PING" => Ok(ServerOp::Ping),
        "PONG" => Ok(ServerOp::Pong),
        "+OK" => Ok(ServerOp::Ok),
        "-ERR" => Ok(ServerOp::Err(rest.trim_matches('\'').to_string())),
        other => Err(ProtocolError::UnknownOp(other.to_string())),
    }
}

/// Split one transport message into ops. A message may carry several lines;
/// each line is parsed independently so one bad line does not poison the rest.
pub fn decode(message: &str) -> Vec<Result<ServerOp, ProtocolError>> {
    message
        .split(CRLF)
        .flat_map(|chunk| chunk.split('\n'))
        .filter(|l| !l.trim().is_empty())
        .map(parse_line)
        .collect()
}
