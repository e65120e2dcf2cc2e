pub mod unix;
pub mod windows;

use crate::model::ProcessRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported OS type: {0}")]
    UnsupportedOs(String),

    #[error("invalid process listing at line {line}: {reason}")]
    Format { line: usize, reason: String },
}

impl ParseError {
    pub(crate) fn format(line: usize, reason: impl Into<String>) -> Self {
        ParseError::Format {
            line,
            reason: reason.into(),
        }
    }
}

/// Process listing formats understood by the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parser {
    /// `ps aux` style output
    Unix,
    /// `tasklist` fixed-width output
    Windows,
}

impl Parser {
    /// Pick the parser for an OS type tag (case-insensitive)
    pub fn for_os_type(os_type: &str) -> Result<Self, ParseError> {
        match os_type.to_ascii_lowercase().as_str() {
            "linux" | "unix" | "mac" => Ok(Parser::Unix),
            "windows" => Ok(Parser::Windows),
            _ => Err(ParseError::UnsupportedOs(os_type.to_string())),
        }
    }

    /// Parse a raw listing into records, in input order.
    ///
    /// Any malformed line fails the whole call.
    pub fn parse(&self, content: &str) -> Result<Vec<ProcessRecord>, ParseError> {
        match self {
            Parser::Unix => unix::parse(content),
            Parser::Windows => windows::parse(content),
        }
    }
}
