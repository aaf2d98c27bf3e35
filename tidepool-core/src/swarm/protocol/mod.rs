//! Text wire grammar shared by the tracker and peer protocols.
//!
//! A message is a command word followed by space-delimited arguments. Piece
//! lists are bracketed, comma-separated decimal indices (`[0,1,2]`, `[]`).
//! Every message type has exactly one parse function returning either the
//! structured message or a [`ParseError`].

pub mod peer;
pub mod tracker;

pub use peer::PeerRequest;
pub use tracker::{PeerList, TrackerRequest, UNREGISTERED_REPLY};

use super::{PieceIndex, PieceSet};

/// Largest UDP payload a tracker message may occupy.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Errors produced while parsing protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,

    #[error("message is not valid UTF-8")]
    NotUtf8,

    #[error("unknown command '{command}'")]
    UnknownCommand { command: String },

    #[error("{command} expects {expected} arguments, found {found}")]
    ArgumentCount {
        command: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid port '{value}'")]
    InvalidPort { value: String },

    #[error("invalid address '{value}'")]
    InvalidAddress { value: String },

    #[error("invalid piece index '{value}'")]
    InvalidPieceIndex { value: String },

    #[error("malformed piece list '{value}'")]
    MalformedPieceList { value: String },

    #[error("malformed peer list: {reason}")]
    MalformedPeerList { reason: String },
}

/// Decodes raw bytes into a trimmed message string.
///
/// # Errors
///
/// - `ParseError::NotUtf8` - If the bytes are not UTF-8
/// - `ParseError::Empty` - If nothing but whitespace was received
pub fn decode_text(bytes: &[u8]) -> Result<&str, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(text)
}

/// Parses a bracketed piece list such as `[0,4,7]`.
///
/// The whole list is rejected if any token is not a piece index, so callers
/// never apply a partially parsed set.
///
/// # Errors
///
/// - `ParseError::MalformedPieceList` - If the brackets are missing
/// - `ParseError::InvalidPieceIndex` - If any element is not a `u32`
pub fn parse_piece_list(value: &str) -> Result<PieceSet, ParseError> {
    let inner = value
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| ParseError::MalformedPieceList {
            value: value.to_string(),
        })?
        .trim();

    if inner.is_empty() {
        return Ok(PieceSet::new());
    }

    inner
        .split(',')
        .map(|token| {
            let token = token.trim();
            token
                .parse::<u32>()
                .map(PieceIndex::new)
                .map_err(|_| ParseError::InvalidPieceIndex {
                    value: token.to_string(),
                })
        })
        .collect()
}

/// Renders a piece set as a bracketed, ascending list.
pub fn format_piece_list(pieces: &PieceSet) -> String {
    let joined = pieces
        .iter()
        .map(|piece| piece.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{joined}]")
}

pub(crate) fn parse_port(value: &str) -> Result<u16, ParseError> {
    value.parse::<u16>().map_err(|_| ParseError::InvalidPort {
        value: value.to_string(),
    })
}
