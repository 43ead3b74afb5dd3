use super::engine::{Engine, EngineMsg, EngineOptions, Request, Shared};
use super::frame::{self, opcode, status, BridgeCommand};
use super::transport::{self, BridgeTransport};
use crate::config::BridgeConfig;
use crate::drivers::driver::{BridgeReply, DaliBusEvent, DaliSendResult, TransportError};
use crate::drivers::send_flags::{Flags, NO_FLAG};
use crate::gear::cmd_defs as cmd;
use crate::utils::dyn_future::DynFutureStatic;
use crate::Error;
use futures::FutureExt;
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Outstanding responses above which sends are serialized
pub const HIGH_WATERMARK: usize = 10;
/// Outstanding responses at or below which sends are pipelined again
pub const LOW_WATERMARK: usize = 5;

const RESET_ATTEMPTS: u32 = 5;
const CONFIRMATION_RESETS: u32 = 2;
const REQUEST_QUEUE_LEN: usize = 256;
const EVENT_QUEUE_LEN: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub engine: EngineOptions,
    pub single_master: bool,
    pub sending_edge_adjustment: i8,
    pub sampling_point_adjustment: i8,
}

impl ClientOptions {
    pub fn from_config(config: &BridgeConfig) -> ClientOptions {
        ClientOptions {
            engine: EngineOptions {
                idle_close: config.idle_close(),
                ..EngineOptions::default()
            },
            single_master: config.single_master,
            sending_edge_adjustment: config.sending_edge_adjustment,
            sampling_point_adjustment: config.sampling_point_adjustment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub outstanding: usize,
    /// Responses where the bridge reported an internal retry
    pub retried: u64,
    /// Responses that never arrived
    pub timeouts: u64,
    /// Bytes discarded because they didn't belong to any response
    pub desync_bytes: u64,
}

/// Marks a running bus procedure. Procedures may nest.
pub struct ProcedureToken {
    shared: Arc<Shared>,
}

impl Drop for ProcedureToken {
    fn drop(&mut self) {
        self.shared.procedures.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle for sending commands through a bridge.
///
/// Futures returned by the send functions don't borrow the client, so a
/// caller can issue several commands before waiting for any of them. The
/// commands are written in the order they were issued.
#[derive(Clone)]
pub struct BridgeClient {
    requests: mpsc::Sender<EngineMsg>,
    shared: Arc<Shared>,
    options: ClientOptions,
    next_delay: Option<Duration>,
}

impl BridgeClient {
    /// Start the engine task for `transport`. Must be called from within a
    /// tokio runtime. The transport is opened on the first command.
    pub fn new(transport: Box<dyn BridgeTransport>, options: ClientOptions) -> BridgeClient {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_LEN);
        let shared = Arc::new(Shared::default());
        let engine = Engine::new(transport, rx, shared.clone(), options.engine.clone());
        tokio::spawn(engine.run());
        BridgeClient {
            requests: tx,
            shared,
            options,
            next_delay: None,
        }
    }

    pub fn open(config: &BridgeConfig) -> Result<BridgeClient, Error> {
        let transport = transport::open(config)?;
        Ok(Self::new(transport, ClientOptions::from_config(config)))
    }

    /// Send a bridge command
    pub fn send_raw(&mut self, command: BridgeCommand, query: bool) -> DynFutureStatic<BridgeReply> {
        let count = self.shared.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        if count > HIGH_WATERMARK {
            if !self.shared.throttled.swap(true, Ordering::SeqCst) {
                debug!("{} responses outstanding, throttling", count);
            }
        } else if count <= LOW_WATERMARK {
            self.shared.throttled.store(false, Ordering::SeqCst);
        }
        let in_sequence = command.delay.is_none() && self.shared.throttled.load(Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let req = Request {
            command,
            query,
            in_sequence,
            reply: tx,
        };
        match self.requests.try_send(EngineMsg::Request(req)) {
            Ok(()) => Box::pin(async move {
                rx.await.unwrap_or_else(|_| {
                    BridgeReply::new(DaliSendResult::Transport(TransportError::Closed))
                })
            }),
            Err(_) => {
                self.shared.response_done();
                Box::pin(std::future::ready(BridgeReply::new(
                    DaliSendResult::Transport(TransportError::QueueFull),
                )))
            }
        }
    }

    /// Wait at least `delay` before sending the next frame
    pub fn delay_next(&mut self, delay: Duration) {
        self.next_delay = Some(delay);
    }

    /// Send a 16 bit forward frame
    pub fn send_frame16(&mut self, frame: [u8; 2], flags: Flags) -> DynFutureStatic<BridgeReply> {
        let op = if flags.expect_answer() {
            opcode::SEND_RECEIVE
        } else if flags.send_twice() {
            opcode::SEND_TWICE
        } else {
            opcode::SEND
        };
        let command = BridgeCommand::new(op, frame[0], frame[1]).with_delay(self.next_delay.take());
        self.send_raw(command, flags.expect_answer())
    }

    pub fn send16(&mut self, frame: [u8; 2], flags: Flags) -> DynFutureStatic<DaliSendResult> {
        Box::pin(self.send_frame16(frame, flags).map(|r| r.result))
    }

    /// Reset the bridge and bring the bus to a known state
    pub async fn reset(&mut self) -> Result<(), Error> {
        let _proc = self.begin_procedure();
        let mut attempt = 1;
        loop {
            let reply = self.send_raw(BridgeCommand::short(opcode::RESET), false).await;
            match reply.result {
                DaliSendResult::Ok if !reply.retried => break,
                r => {
                    if attempt >= RESET_ATTEMPTS {
                        let r = match r {
                            DaliSendResult::Ok => {
                                DaliSendResult::Unclassified(frame::ACK_RETRIED, status::OK)
                            }
                            r => r,
                        };
                        return Err(Error::Send(r));
                    }
                    warn!("Bridge reset attempt {} failed: {}", attempt, r);
                    attempt += 1;
                }
            }
        }
        for _ in 0..CONFIRMATION_RESETS {
            self.send_raw(BridgeCommand::short(opcode::RESET), false)
                .await
                .result
                .check_send()?;
        }
        self.send_raw(BridgeCommand::new(opcode::OVERLOAD_RESET, 0, 0), false)
            .await
            .result
            .check_send()?;
        let (edge, sampling) = (
            self.options.sending_edge_adjustment,
            self.options.sampling_point_adjustment,
        );
        self.adjust_timing(edge, sampling).await?;
        self.send16(cmd::TERMINATE().0, NO_FLAG).await.check_send()?;
        self.requests
            .send(EngineMsg::Keepalive(self.options.single_master))
            .await
            .map_err(|_| DaliSendResult::Transport(TransportError::Closed))?;
        info!(
            "Bridge reset done{}",
            if self.options.single_master {
                ", keepalive enabled"
            } else {
                ""
            }
        );
        Ok(())
    }

    /// Set sending edge and sampling point delays in 1/256 bit times
    pub async fn adjust_timing(&mut self, edge: i8, sampling: i8) -> Result<(), DaliSendResult> {
        self.options.sending_edge_adjustment = edge;
        self.options.sampling_point_adjustment = sampling;
        self.send_raw(
            BridgeCommand::new(opcode::EDGE_ADJUST, edge as u8, sampling as u8),
            false,
        )
        .await
        .result
        .check_send()
    }

    pub async fn bridge_version(&mut self) -> Result<u8, DaliSendResult> {
        self.send_raw(BridgeCommand::short(opcode::VERSION), true)
            .await
            .result
            .check_answer()
    }

    /// Check that the bridge returns both data bytes unchanged
    pub async fn echo(&mut self, data1: u8, data2: u8) -> Result<bool, DaliSendResult> {
        let first = self.send_raw(BridgeCommand::new(opcode::ECHO_1, data1, data2), true);
        let second = self.send_raw(BridgeCommand::new(opcode::ECHO_2, data1, data2), true);
        let a = first.await.result.check_answer()?;
        let b = second.await.result.check_answer()?;
        Ok(a == data1 && b == data2)
    }

    pub fn begin_procedure(&self) -> ProcedureToken {
        self.shared.procedures.fetch_add(1, Ordering::SeqCst);
        ProcedureToken {
            shared: self.shared.clone(),
        }
    }

    pub fn procedures_active(&self) -> usize {
        self.shared.procedures.load(Ordering::SeqCst)
    }

    /// Receive frames from other masters. Replaces any earlier subscriber.
    pub fn subscribe_events(&self) -> Result<mpsc::Receiver<DaliBusEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_LEN);
        self.requests
            .try_send(EngineMsg::Listen(tx))
            .map_err(|_| TransportError::QueueFull)?;
        Ok(rx)
    }

    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            outstanding: self.outstanding(),
            retried: self.shared.retried.load(Ordering::Relaxed),
            timeouts: self.shared.timeouts.load(Ordering::Relaxed),
            desync_bytes: self.shared.desync_bytes.load(Ordering::Relaxed),
        }
    }
}
