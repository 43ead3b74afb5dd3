use std::error::Error;
use std::fmt;
use std::time::Instant;

/// Failures below the bridge protocol
#[derive(Debug)]
pub enum TransportError {
    /// No response from the bridge within the response timeout
    Timeout,
    /// The link was closed while a response was outstanding
    Closed,
    Io(std::io::Error),
    /// The request queue to the bridge engine is full or gone
    QueueFull,
}

impl Error for TransportError {}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "No response from bridge"),
            TransportError::Closed => write!(f, "Bridge connection closed"),
            TransportError::Io(e) => write!(f, "Bridge I/O error: {}", e),
            TransportError::QueueFull => write!(f, "Bridge request queue full"),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> TransportError {
        TransportError::Io(e)
    }
}

/// Classified outcome of a single command sent through the bridge
#[derive(Debug)]
pub enum DaliSendResult {
    /// Command sent, no answer expected
    Ok,
    /// Answer to a query
    Answer(u8),
    /// No answer from the bus. A plain "no" for yes/no queries.
    Timeout,
    /// Multiple devices answered at once or the answer was corrupt
    Framing,
    /// Bus overload or short circuit
    Overload,
    /// The bridge rejected the command
    InvalidBridgeCommand,
    /// A query was sent but the bridge returned no data
    MissingData,
    /// Response code and payload not recognised
    Unclassified(u8, u8),
    Transport(TransportError),
}

impl DaliSendResult {
    pub fn check_send(self) -> Result<(), DaliSendResult> {
        match self {
            DaliSendResult::Ok | DaliSendResult::Answer(_) => Ok(()),
            e => Err(e),
        }
    }

    pub fn check_answer(self) -> Result<u8, DaliSendResult> {
        match self {
            DaliSendResult::Answer(r) => Ok(r),
            e => Err(e),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DaliSendResult::Timeout)
    }

    pub fn is_framing_error(&self) -> bool {
        matches!(self, DaliSendResult::Framing)
    }

    /// Conditions that are never retried locally
    pub fn is_severe(&self) -> bool {
        matches!(
            self,
            DaliSendResult::Overload
                | DaliSendResult::InvalidBridgeCommand
                | DaliSendResult::Transport(_)
        )
    }
}

impl Error for DaliSendResult {}

impl fmt::Display for DaliSendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaliSendResult::Ok => write!(f, "OK"),
            DaliSendResult::Answer(r) => write!(f, "Answer: 0x{:02x}", r),
            DaliSendResult::Timeout => write!(f, "No answer"),
            DaliSendResult::Framing => write!(f, "Framing error"),
            DaliSendResult::Overload => write!(f, "Bus overload"),
            DaliSendResult::InvalidBridgeCommand => write!(f, "Invalid bridge command"),
            DaliSendResult::MissingData => write!(f, "Missing data"),
            DaliSendResult::Unclassified(code, data) => {
                write!(f, "Unclassified response 0x{:02x} 0x{:02x}", code, data)
            }
            DaliSendResult::Transport(e) => e.fmt(f),
        }
    }
}

/// Result together with the bridge's retry indication
#[derive(Debug)]
pub struct BridgeReply {
    pub result: DaliSendResult,
    /// The bridge repeated the command internally before answering
    pub retried: bool,
}

impl BridgeReply {
    pub fn new(result: DaliSendResult) -> BridgeReply {
        BridgeReply {
            result,
            retried: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaliBusEventType {
    /// Frame sent by another master
    Frame16([u8; 2]),
    /// The connection to the bridge was lost
    LinkLost,
}

#[derive(Debug, Clone)]
pub struct DaliBusEvent {
    pub timestamp: Instant,
    pub event_type: DaliBusEventType,
}

impl fmt::Display for DaliBusEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaliBusEventType::Frame16(d) => write!(f, "{:02x} {:02x}", d[0], d[1]),
            DaliBusEventType::LinkLost => write!(f, "Link lost"),
        }
    }
}
