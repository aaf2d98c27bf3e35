//! Tracker datagram messages: JOIN, UPDATE, PEERS and their replies.

use std::fmt;
use std::net::IpAddr;

use super::{ParseError, format_piece_list, parse_piece_list, parse_port};
use crate::swarm::{PeerEntry, PeerIdentity, PieceSet};

/// Requests a peer sends to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerRequest {
    /// Register or re-register. The advertised address is informational;
    /// the tracker keys the record on the datagram's source IP.
    Join { advertised_ip: String, port: u16 },
    /// Replace the sender's advertised piece set.
    Update { port: u16, pieces: PieceSet },
    /// Ask for the current peer list without touching the sender's record.
    Peers { port: u16 },
}

impl TrackerRequest {
    /// Parses a tracker request datagram.
    ///
    /// # Errors
    ///
    /// - `ParseError::Empty` - If the message is blank
    /// - `ParseError::UnknownCommand` - If the command word is not recognised
    /// - `ParseError::ArgumentCount` - If the argument count is wrong
    /// - `ParseError::InvalidPort` - If the port is not a `u16`
    /// - `ParseError::InvalidPieceIndex` / `MalformedPieceList` - If the
    ///   UPDATE piece list is malformed
    pub fn parse(message: &str) -> Result<Self, ParseError> {
        let message = message.trim();
        let (command, rest) = match message.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (message, ""),
        };

        match command {
            "" => Err(ParseError::Empty),
            "JOIN" => {
                let args: Vec<&str> = rest.split_whitespace().collect();
                if args.len() != 2 {
                    return Err(ParseError::ArgumentCount {
                        command: "JOIN",
                        expected: 2,
                        found: args.len(),
                    });
                }
                Ok(Self::Join {
                    advertised_ip: args[0].to_string(),
                    port: parse_port(args[1])?,
                })
            }
            "UPDATE" => {
                let Some((port, pieces)) = rest.split_once(char::is_whitespace) else {
                    return Err(ParseError::ArgumentCount {
                        command: "UPDATE",
                        expected: 2,
                        found: usize::from(!rest.is_empty()),
                    });
                };
                Ok(Self::Update {
                    port: parse_port(port)?,
                    pieces: parse_piece_list(pieces)?,
                })
            }
            "PEERS" => {
                let args: Vec<&str> = rest.split_whitespace().collect();
                if args.len() != 1 {
                    return Err(ParseError::ArgumentCount {
                        command: "PEERS",
                        expected: 1,
                        found: args.len(),
                    });
                }
                Ok(Self::Peers {
                    port: parse_port(args[0])?,
                })
            }
            other => Err(ParseError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }

    /// TCP port the request refers to.
    pub fn port(&self) -> u16 {
        match self {
            Self::Join { port, .. } | Self::Update { port, .. } | Self::Peers { port } => *port,
        }
    }
}

impl fmt::Display for TrackerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join {
                advertised_ip,
                port,
            } => write!(f, "JOIN {advertised_ip} {port}"),
            Self::Update { port, pieces } => {
                write!(f, "UPDATE {port} {}", format_piece_list(pieces))
            }
            Self::Peers { port } => write!(f, "PEERS {port}"),
        }
    }
}

/// Reply to a `PEERS` query from a peer the tracker holds no record for.
pub const UNREGISTERED_REPLY: &str = "UNREGISTERED";

/// The tracker's `PEERLIST` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerList {
    pub entries: Vec<PeerEntry>,
}

impl PeerList {
    pub fn new(entries: Vec<PeerEntry>) -> Self {
        Self { entries }
    }

    /// Parses a `PEERLIST [ip:port:[p,..];...]` reply.
    ///
    /// Separators may carry surrounding whitespace. An individual entry that
    /// fails to parse is logged and skipped; the remaining entries are kept.
    ///
    /// # Errors
    ///
    /// - `ParseError::UnknownCommand` - If the reply is not a PEERLIST
    /// - `ParseError::MalformedPeerList` - If the outer brackets are missing
    pub fn parse(message: &str) -> Result<Self, ParseError> {
        let message = message.trim();
        let Some(rest) = message.strip_prefix("PEERLIST") else {
            let command = message.split_whitespace().next().unwrap_or_default();
            return Err(ParseError::UnknownCommand {
                command: command.to_string(),
            });
        };

        let inner = rest
            .trim()
            .strip_prefix('[')
            .and_then(|body| body.strip_suffix(']'))
            .ok_or_else(|| ParseError::MalformedPeerList {
                reason: "missing enclosing brackets".to_string(),
            })?;

        let mut entries = Vec::new();
        for raw_entry in inner.split(';') {
            let raw_entry = raw_entry.trim();
            if raw_entry.is_empty() {
                continue;
            }
            match parse_entry(raw_entry) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping peer list entry '{}': {}", raw_entry, e),
            }
        }

        Ok(Self { entries })
    }

    /// Drops the entry for `identity`, if present.
    pub fn excluding(mut self, identity: &PeerIdentity) -> Self {
        self.entries.retain(|entry| entry.identity != *identity);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for PeerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .entries
            .iter()
            .map(|entry| format!("{}:{}", entry.identity, format_piece_list(&entry.pieces)))
            .collect::<Vec<_>>()
            .join(";");
        write!(f, "PEERLIST [{rendered}]")
    }
}

/// Parses one `ip:port:[pieces]` entry. The IP may itself contain colons.
fn parse_entry(entry: &str) -> Result<PeerEntry, ParseError> {
    let split_at = entry.find(":[").ok_or_else(|| ParseError::MalformedPeerList {
        reason: format!("entry '{entry}' has no piece list"),
    })?;
    let (address, pieces) = (&entry[..split_at], &entry[split_at + 1..]);

    let (ip, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ParseError::InvalidAddress {
            value: address.to_string(),
        })?;
    let ip = ip
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| ParseError::InvalidAddress {
            value: ip.to_string(),
        })?;
    let port = parse_port(port.trim())?;

    Ok(PeerEntry::new(
        PeerIdentity::new(ip, port),
        parse_piece_list(pieces)?,
    ))
}
