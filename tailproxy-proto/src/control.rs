//! The child -> supervisor control protocol: newline-terminated,
//! whitespace-split text lines of the form `<cmd> <family> <port>`.

use std::fmt;
use std::str::FromStr;

/// Address family token carried on the wire, `tcp4` or `tcp6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Tcp4,
    Tcp6,
}

impl Family {
    pub fn as_str(self) -> &'static str {
        match self {
            Family::Tcp4 => "tcp4",
            Family::Tcp6 => "tcp6",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp4" => Ok(Family::Tcp4),
            "tcp6" => Ok(Family::Tcp6),
            other => Err(ParseError::UnknownFamily(other.to_string())),
        }
    }
}

/// A single control-channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Listen { family: Family, port: u16 },
    Close { family: Family, port: u16 },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed control line: {0:?}")]
    Malformed(String),
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    #[error("unknown family: {0:?}")]
    UnknownFamily(String),
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
}

impl ControlMessage {
    /// Encodes this message as a single line, newline included.
    pub fn encode(&self) -> String {
        match self {
            ControlMessage::Listen { family, port } => format!("LISTEN {family} {port}\n"),
            ControlMessage::Close { family, port } => format!("CLOSE {family} {port}\n"),
        }
    }

    /// Parses a single line (newline and surrounding whitespace already
    /// stripped or not — this trims). Unknown commands and malformed lines
    /// return an error so the caller can log and skip, per spec: "Unknown or
    /// malformed lines are skipped."
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let cmd = parts
            .next()
            .ok_or_else(|| ParseError::Malformed(line.to_string()))?;
        let family = parts
            .next()
            .ok_or_else(|| ParseError::Malformed(line.to_string()))?
            .parse::<Family>()?;
        let port_tok = parts
            .next()
            .ok_or_else(|| ParseError::Malformed(line.to_string()))?;
        let port: u16 = port_tok
            .parse()
            .map_err(|_| ParseError::InvalidPort(port_tok.to_string()))?;

        if parts.next().is_some() {
            return Err(ParseError::Malformed(line.to_string()));
        }

        match cmd {
            "LISTEN" => Ok(ControlMessage::Listen { family, port }),
            "CLOSE" => Ok(ControlMessage::Close { family, port }),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}
