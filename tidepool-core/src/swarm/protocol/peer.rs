//! Peer-to-peer request lines: `SIZE` and `GET <index>`.

use std::fmt;

use super::ParseError;
use crate::swarm::PieceIndex;

/// Maximum length of a request line accepted by the upload path.
pub const MAX_REQUEST_LINE: usize = 1024;

/// A single request sent at the start of a transfer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRequest {
    /// Ask for the total file size in bytes.
    Size,
    /// Ask for the full payload of one piece.
    Get(PieceIndex),
}

impl PeerRequest {
    /// Parses a request line.
    ///
    /// # Errors
    ///
    /// - `ParseError::Empty` - If the line is blank
    /// - `ParseError::UnknownCommand` - If the command is not SIZE or GET
    /// - `ParseError::ArgumentCount` - If an argument is missing or extra
    /// - `ParseError::InvalidPieceIndex` - If the GET index is not a `u32`
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut tokens = line.split_whitespace();
        let Some(command) = tokens.next() else {
            return Err(ParseError::Empty);
        };
        let args: Vec<&str> = tokens.collect();

        match command {
            "SIZE" if args.is_empty() => Ok(Self::Size),
            "SIZE" => Err(ParseError::ArgumentCount {
                command: "SIZE",
                expected: 0,
                found: args.len(),
            }),
            "GET" if args.len() == 1 => args[0]
                .parse::<u32>()
                .map(|index| Self::Get(PieceIndex::new(index)))
                .map_err(|_| ParseError::InvalidPieceIndex {
                    value: args[0].to_string(),
                }),
            "GET" => Err(ParseError::ArgumentCount {
                command: "GET",
                expected: 1,
                found: args.len(),
            }),
            other => Err(ParseError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }

    /// Request line including the terminating newline.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for PeerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size => write!(f, "SIZE"),
            Self::Get(index) => write!(f, "GET {index}"),
        }
    }
}
