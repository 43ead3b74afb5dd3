//! Simulated bridge speaking the byte protocol over an in-memory stream

use super::gear::SimGear;
use crate::drivers::bridge::frame::{self, opcode, status, BridgeResponse, ResponseCode};
use crate::drivers::bridge::transport::{BridgeStream, BridgeTransport};
use crate::utils::dyn_future::DynFutureStatic;
use log::debug;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const SIM_BRIDGE_VERSION: u8 = 0x05;

/// Bus state shared between the simulated bridge and the test
#[derive(Debug, Default)]
pub struct SimBus {
    pub gear: Vec<SimGear>,
    /// Bus is shorted, every send fails with overload
    pub overload: bool,
    /// Zero based indexes of SEND_RECEIVE commands that the bridge executes
    /// twice and reports as retried
    pub retried_queries: Vec<usize>,
    /// Number of upcoming resets answered with ack-retried
    pub retried_resets: u32,
    /// Frames from another master, sent ahead of the next response
    pub foreign_frames: Vec<[u8; 2]>,
    /// Every command received: (opcode, data1, data2)
    pub log: Vec<(u8, u8, u8)>,
    pub edge_adjustment: (u8, u8),
    /// Number of times the transport was opened
    pub connections: usize,
    queries: usize,
}

impl SimBus {
    pub fn new(gear: Vec<SimGear>) -> Arc<Mutex<SimBus>> {
        Arc::new(Mutex::new(SimBus {
            gear,
            ..SimBus::default()
        }))
    }

    fn forward(&mut self, frame: [u8; 2], twice: bool) -> Vec<u8> {
        self.gear
            .iter_mut()
            .filter_map(|g| g.forward16(frame, twice))
            .collect()
    }

    fn ack(status: u8) -> BridgeResponse {
        BridgeResponse {
            code: ResponseCode::Ack,
            payload: status,
            retried: false,
        }
    }

    fn data(payload: u8) -> BridgeResponse {
        BridgeResponse {
            code: ResponseCode::Data,
            payload,
            retried: false,
        }
    }

    /// Execute one bridge command
    pub fn execute(&mut self, op: u8, d1: u8, d2: u8) -> BridgeResponse {
        self.log.push((op, d1, d2));
        match op {
            opcode::RESET => {
                let mut resp = Self::ack(status::OK);
                if self.retried_resets > 0 {
                    self.retried_resets -= 1;
                    resp.retried = true;
                }
                resp
            }
            opcode::VERSION => Self::data(SIM_BRIDGE_VERSION),
            opcode::SEND | opcode::SEND_TWICE | opcode::SEND_RECEIVE if self.overload => {
                Self::ack(status::OVERLOAD)
            }
            opcode::SEND => {
                self.forward([d1, d2], false);
                Self::ack(status::OK)
            }
            opcode::SEND_TWICE => {
                self.forward([d1, d2], true);
                Self::ack(status::OK)
            }
            opcode::SEND_RECEIVE => {
                let index = self.queries;
                self.queries += 1;
                let mut answers = self.forward([d1, d2], false);
                let retried = self.retried_queries.contains(&index);
                if retried {
                    answers = self.forward([d1, d2], false);
                }
                let mut resp = match answers.len() {
                    0 => Self::ack(status::TIMEOUT),
                    1 => Self::data(answers[0]),
                    _ => Self::ack(status::FRAME_ERROR),
                };
                resp.retried = retried;
                resp
            }
            opcode::ECHO_1 => Self::data(d1),
            opcode::ECHO_2 => Self::data(d2),
            opcode::OVERLOAD_RESET => Self::ack(status::OK),
            opcode::EDGE_ADJUST => {
                self.edge_adjustment = (d1, d2);
                Self::ack(status::OK)
            }
            _ => Self::ack(status::INVALID_COMMAND),
        }
    }
}

/// Serve the bridge protocol on `stream` until it's closed
pub async fn run_bridge(bus: Arc<Mutex<SimBus>>, mut stream: DuplexStream) -> io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 64];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        loop {
            let Some(&op) = buf.first() else { break };
            let (d1, d2, len) = if op < opcode::SEND {
                (0, 0, 1)
            } else if buf.len() >= 3 {
                (buf[1], buf[2], 3)
            } else {
                break;
            };
            buf.drain(..len);
            let mut out = Vec::new();
            {
                let mut bus = match bus.lock() {
                    Ok(b) => b,
                    Err(p) => p.into_inner(),
                };
                for f in bus.foreign_frames.drain(..) {
                    out.extend_from_slice(&[frame::EVENT, f[0], f[1]]);
                }
                let resp = bus.execute(op, d1, d2);
                debug!("Sim bridge {:02x} {:02x} {:02x} -> {:?}", op, d1, d2, resp);
                out.extend_from_slice(&resp.encode());
            }
            stream.write_all(&out).await?;
        }
    }
}

/// Transport that starts a new simulated bridge on every connect
pub struct SimTransport {
    bus: Arc<Mutex<SimBus>>,
}

impl SimTransport {
    pub fn new(bus: Arc<Mutex<SimBus>>) -> SimTransport {
        SimTransport { bus }
    }
}

impl BridgeTransport for SimTransport {
    fn connect(&self) -> DynFutureStatic<io::Result<Box<dyn BridgeStream>>> {
        let (client, server) = tokio::io::duplex(1024);
        match self.bus.lock() {
            Ok(mut b) => b.connections += 1,
            Err(p) => p.into_inner().connections += 1,
        }
        tokio::spawn(run_bridge(self.bus.clone(), server));
        Box::pin(std::future::ready(Ok(Box::new(client) as Box<dyn BridgeStream>)))
    }

    fn description(&self) -> String {
        "simulator".to_string()
    }
}
