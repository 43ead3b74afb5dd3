//! Byte level framing of the bridge protocol.
//!
//! Commands are one byte (opcodes below 0x10) or three bytes. Every command
//! is answered with a two byte response. Frames seen on the bus from other
//! masters arrive unsolicited as a three byte event.

use crate::drivers::driver::DaliSendResult;
use std::time::Duration;

pub mod opcode {
    pub const RESET: u8 = 0x00;
    pub const VERSION: u8 = 0x01;
    pub const SEND: u8 = 0x10;
    pub const SEND_TWICE: u8 = 0x11;
    pub const SEND_RECEIVE: u8 = 0x12;
    pub const ECHO_1: u8 = 0x41;
    pub const ECHO_2: u8 = 0x42;
    pub const OVERLOAD_RESET: u8 = 0x43;
    pub const EDGE_ADJUST: u8 = 0x44;
}

pub const ACK: u8 = 0x2a;
pub const ACK_RETRIED: u8 = 0x2b;
pub const DATA: u8 = 0x3d;
pub const DATA_RETRIED: u8 = 0x3e;
pub const EVENT: u8 = 0x23;

pub mod status {
    pub const OK: u8 = 0x30;
    pub const TIMEOUT: u8 = 0x31;
    pub const FRAME_ERROR: u8 = 0x32;
    pub const OVERLOAD: u8 = 0x33;
    pub const INVALID_COMMAND: u8 = 0x39;
}

/// Commands below this opcode carry no data bytes
const FIRST_LONG_OPCODE: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeCommand {
    pub opcode: u8,
    pub data1: u8,
    pub data2: u8,
    /// Minimum time to wait before the command is written
    pub delay: Option<Duration>,
}

impl BridgeCommand {
    pub const fn new(opcode: u8, data1: u8, data2: u8) -> BridgeCommand {
        BridgeCommand {
            opcode,
            data1,
            data2,
            delay: None,
        }
    }

    pub const fn short(opcode: u8) -> BridgeCommand {
        BridgeCommand::new(opcode, 0, 0)
    }

    pub fn with_delay(mut self, delay: Option<Duration>) -> BridgeCommand {
        self.delay = delay;
        self
    }

    pub fn is_short(&self) -> bool {
        self.opcode < FIRST_LONG_OPCODE
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.opcode);
        if !self.is_short() {
            buf.push(self.data1);
            buf.push(self.data2);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ack,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeResponse {
    pub code: ResponseCode,
    pub payload: u8,
    pub retried: bool,
}

impl BridgeResponse {
    /// None if `code` isn't a response code
    pub fn decode(code: u8, payload: u8) -> Option<BridgeResponse> {
        let (code, retried) = match code {
            ACK => (ResponseCode::Ack, false),
            ACK_RETRIED => (ResponseCode::Ack, true),
            DATA => (ResponseCode::Data, false),
            DATA_RETRIED => (ResponseCode::Data, true),
            _ => return None,
        };
        Some(BridgeResponse {
            code,
            payload,
            retried,
        })
    }

    pub fn is_response_code(code: u8) -> bool {
        matches!(code, ACK | ACK_RETRIED | DATA | DATA_RETRIED)
    }

    /// `query` is set if the command expected an answer from the bus
    pub fn classify(&self, query: bool) -> DaliSendResult {
        match self.code {
            ResponseCode::Data => DaliSendResult::Answer(self.payload),
            ResponseCode::Ack => match self.payload {
                status::OK if query => DaliSendResult::MissingData,
                status::OK => DaliSendResult::Ok,
                status::TIMEOUT => DaliSendResult::Timeout,
                status::FRAME_ERROR => DaliSendResult::Framing,
                status::OVERLOAD => DaliSendResult::Overload,
                status::INVALID_COMMAND => DaliSendResult::InvalidBridgeCommand,
                s => DaliSendResult::Unclassified(
                    if self.retried { ACK_RETRIED } else { ACK },
                    s,
                ),
            },
        }
    }

    pub fn encode(&self) -> [u8; 2] {
        let code = match (self.code, self.retried) {
            (ResponseCode::Ack, false) => ACK,
            (ResponseCode::Ack, true) => ACK_RETRIED,
            (ResponseCode::Data, false) => DATA,
            (ResponseCode::Data, true) => DATA_RETRIED,
        };
        [code, self.payload]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_length() {
        let mut buf = Vec::new();
        BridgeCommand::short(opcode::RESET).encode(&mut buf);
        assert_eq!(buf, [0x00]);
        buf.clear();
        BridgeCommand::new(opcode::SEND_RECEIVE, 0x07, 0x90).encode(&mut buf);
        assert_eq!(buf, [0x12, 0x07, 0x90]);
        buf.clear();
        BridgeCommand::new(opcode::VERSION, 5, 5).encode(&mut buf);
        assert_eq!(buf, [0x01]);
    }

    #[test]
    fn classify_responses() {
        let ack = |s| BridgeResponse::decode(ACK, s).unwrap();
        assert!(matches!(ack(status::OK).classify(false), DaliSendResult::Ok));
        assert!(matches!(
            ack(status::OK).classify(true),
            DaliSendResult::MissingData
        ));
        assert!(ack(status::TIMEOUT).classify(true).is_timeout());
        assert!(ack(status::FRAME_ERROR).classify(true).is_framing_error());
        assert!(ack(status::OVERLOAD).classify(false).is_severe());
        assert!(matches!(
            ack(status::INVALID_COMMAND).classify(false),
            DaliSendResult::InvalidBridgeCommand
        ));
        assert!(matches!(
            ack(0x37).classify(false),
            DaliSendResult::Unclassified(ACK, 0x37)
        ));

        let data = BridgeResponse::decode(DATA_RETRIED, 0x55).unwrap();
        assert!(data.retried);
        assert!(matches!(data.classify(true), DaliSendResult::Answer(0x55)));
        assert_eq!(data.encode(), [DATA_RETRIED, 0x55]);

        assert_eq!(BridgeResponse::decode(EVENT, 0), None);
    }
}
