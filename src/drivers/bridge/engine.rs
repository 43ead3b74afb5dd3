//! Task owning the connection to the bridge.
//!
//! Requests are written in the order they are received. Each written command
//! gets an entry in the pending queue and the next two byte response from the
//! bridge completes the oldest entry.

use super::frame::{self, BridgeCommand, BridgeResponse};
use super::transport::{BridgeStream, BridgeTransport};
use crate::drivers::driver::{
    BridgeReply, DaliBusEvent, DaliBusEventType, DaliSendResult, TransportError,
};
use crate::gear::cmd_defs as cmd;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};

pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(20);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10 * 60);
// Recheck interval when the keepalive is due during a procedure
const KEEPALIVE_RECHECK: Duration = Duration::from_secs(30);

pub(crate) struct Request {
    pub command: BridgeCommand,
    /// The command expects an answer from the bus
    pub query: bool,
    /// Hold the command until no responses are pending
    pub in_sequence: bool,
    pub reply: oneshot::Sender<BridgeReply>,
}

pub(crate) enum EngineMsg {
    Request(Request),
    Listen(mpsc::Sender<DaliBusEvent>),
    /// Start or stop the idle PING
    Keepalive(bool),
}

/// State shared between the engine and its clients
#[derive(Default)]
pub(crate) struct Shared {
    pub outstanding: AtomicUsize,
    pub throttled: AtomicBool,
    pub procedures: AtomicUsize,
    pub retried: AtomicU64,
    pub timeouts: AtomicU64,
    pub desync_bytes: AtomicU64,
}

impl Shared {
    pub fn response_done(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub response_timeout: Duration,
    pub idle_close: Option<Duration>,
    pub keepalive_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            response_timeout: RESPONSE_TIMEOUT,
            idle_close: None,
            keepalive_interval: KEEPALIVE_INTERVAL,
        }
    }
}

struct Pending {
    reply: Option<oneshot::Sender<BridgeReply>>,
    query: bool,
    deadline: Instant,
}

pub(crate) struct Engine {
    transport: Box<dyn BridgeTransport>,
    stream: Option<Box<dyn BridgeStream>>,
    requests: mpsc::Receiver<EngineMsg>,
    // Request received but not yet written, with its earliest send time
    held: Option<(Request, Instant)>,
    pending: VecDeque<Pending>,
    rx_buf: Vec<u8>,
    listener: Option<mpsc::Sender<DaliBusEvent>>,
    shared: Arc<Shared>,
    options: EngineOptions,
    last_activity: Instant,
    keepalive: bool,
    next_keepalive: Instant,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(t) => sleep_until(t).await,
        None => std::future::pending().await,
    }
}

async fn read_some(stream: &mut Option<Box<dyn BridgeStream>>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stream {
        Some(s) => s.read(buf).await,
        None => std::future::pending().await,
    }
}

impl Engine {
    pub fn new(
        transport: Box<dyn BridgeTransport>,
        requests: mpsc::Receiver<EngineMsg>,
        shared: Arc<Shared>,
        options: EngineOptions,
    ) -> Engine {
        let now = Instant::now();
        Engine {
            transport,
            stream: None,
            requests,
            held: None,
            pending: VecDeque::new(),
            rx_buf: Vec::new(),
            listener: None,
            shared,
            keepalive: false,
            next_keepalive: now + options.keepalive_interval,
            options,
            last_activity: now,
        }
    }

    pub async fn run(mut self) {
        let mut read_buf = [0u8; 64];
        loop {
            let send_at = match &self.held {
                Some((req, _)) if req.in_sequence && !self.pending.is_empty() => None,
                Some((_, at)) => Some(*at),
                None => None,
            };
            let response_deadline = self.pending.front().map(|p| p.deadline);
            let idle_at = self.idle_deadline();
            select! {
                msg = self.requests.recv(), if self.held.is_none() => {
                    match msg {
                        Some(EngineMsg::Request(req)) => {
                            let at = Instant::now() + req.command.delay.unwrap_or(Duration::ZERO);
                            self.held = Some((req, at));
                        }
                        Some(EngineMsg::Listen(tx)) => {
                            self.listener = Some(tx);
                        }
                        Some(EngineMsg::Keepalive(on)) => {
                            self.keepalive = on;
                            self.next_keepalive = Instant::now() + self.options.keepalive_interval;
                        }
                        None => break,
                    }
                }
                _ = sleep_until_opt(send_at) => {
                    if let Some((req, _)) = self.held.take() {
                        self.transmit(req.command, req.query, Some(req.reply)).await;
                    }
                }
                r = read_some(&mut self.stream, &mut read_buf) => {
                    match r {
                        Ok(0) => self.link_lost("closed by bridge"),
                        Ok(n) => self.receive(&read_buf[..n]),
                        Err(e) => self.link_lost(&e.to_string()),
                    }
                }
                _ = sleep_until_opt(response_deadline) => {
                    self.response_timeout();
                }
                _ = sleep_until_opt(idle_at) => {
                    self.idle().await;
                }
            }
        }
        debug!("Bridge engine stopped");
    }

    fn idle_deadline(&self) -> Option<Instant> {
        if !self.pending.is_empty() || self.held.is_some() {
            return None;
        }
        let close = match (&self.stream, self.options.idle_close) {
            (Some(_), Some(idle)) => Some(self.last_activity + idle),
            _ => None,
        };
        let keepalive = if self.keepalive {
            Some(self.next_keepalive)
        } else {
            None
        };
        match (close, keepalive) {
            (Some(c), Some(k)) => Some(c.min(k)),
            (c, k) => c.or(k),
        }
    }

    async fn idle(&mut self) {
        let now = Instant::now();
        if self.keepalive && now >= self.next_keepalive {
            if self.shared.procedures.load(Ordering::SeqCst) > 0 {
                self.next_keepalive = now + KEEPALIVE_RECHECK;
            } else {
                debug!("Sending keepalive");
                self.next_keepalive = now + self.options.keepalive_interval;
                let ping = cmd::PING().0;
                self.transmit(
                    BridgeCommand::new(frame::opcode::SEND, ping[0], ping[1]),
                    false,
                    None,
                )
                .await;
            }
            return;
        }
        if let Some(idle) = self.options.idle_close {
            if self.stream.is_some() && now >= self.last_activity + idle {
                info!("Closing idle connection to {}", self.transport.description());
                self.stream = None;
                self.rx_buf.clear();
            }
        }
    }

    async fn transmit(
        &mut self,
        command: BridgeCommand,
        query: bool,
        reply: Option<oneshot::Sender<BridgeReply>>,
    ) {
        let counted = reply.is_some();
        if self.stream.is_none() {
            match self.transport.connect().await {
                Ok(s) => {
                    info!("Opened bridge {}", self.transport.description());
                    self.stream = Some(s);
                }
                Err(e) => {
                    warn!("Failed to open bridge {}: {}", self.transport.description(), e);
                    self.finish(reply, counted, BridgeReply::new(DaliSendResult::Transport(e.into())));
                    return;
                }
            }
        }
        let mut bytes = Vec::with_capacity(3);
        command.encode(&mut bytes);
        debug!("-> {:02x?}", bytes);
        let res = match self.stream.as_mut() {
            Some(s) => s.write_all(&bytes).await,
            None => return,
        };
        if let Err(e) = res {
            self.finish(reply, counted, BridgeReply::new(DaliSendResult::Transport(e.into())));
            self.link_lost("write failed");
            return;
        }
        let now = Instant::now();
        self.pending.push_back(Pending {
            reply,
            query,
            deadline: now + self.options.response_timeout,
        });
        self.last_activity = now;
        self.next_keepalive = now + self.options.keepalive_interval;
    }

    fn finish(&self, reply: Option<oneshot::Sender<BridgeReply>>, counted: bool, result: BridgeReply) {
        if counted {
            self.shared.response_done();
        }
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    fn complete(&mut self, result: BridgeReply) {
        if let Some(p) = self.pending.pop_front() {
            let counted = p.reply.is_some();
            self.finish(p.reply, counted, result);
        }
    }

    fn receive(&mut self, data: &[u8]) {
        debug!("<- {:02x?}", data);
        self.rx_buf.extend_from_slice(data);
        while let Some(&lead) = self.rx_buf.first() {
            if lead == frame::EVENT {
                if self.rx_buf.len() < 3 {
                    break;
                }
                let bus_frame = [self.rx_buf[1], self.rx_buf[2]];
                self.rx_buf.drain(..3);
                self.dispatch(DaliBusEventType::Frame16(bus_frame));
                continue;
            }
            if self.pending.is_empty() || !BridgeResponse::is_response_code(lead) {
                warn!("Discarding unexpected byte 0x{:02x} from bridge", lead);
                self.shared.desync_bytes.fetch_add(1, Ordering::Relaxed);
                self.rx_buf.remove(0);
                continue;
            }
            if self.rx_buf.len() < 2 {
                break;
            }
            let payload = self.rx_buf[1];
            self.rx_buf.drain(..2);
            let Some(resp) = BridgeResponse::decode(lead, payload) else {
                continue;
            };
            let query = self.pending.front().map(|p| p.query).unwrap_or(false);
            if resp.retried {
                self.shared.retried.fetch_add(1, Ordering::Relaxed);
            }
            let result = resp.classify(query);
            self.complete(BridgeReply {
                result,
                retried: resp.retried,
            });
        }
    }

    fn response_timeout(&mut self) {
        warn!("No response from bridge");
        self.shared.timeouts.fetch_add(1, Ordering::Relaxed);
        // A partial response belongs to the request that timed out
        self.rx_buf.clear();
        self.complete(BridgeReply::new(DaliSendResult::Transport(
            TransportError::Timeout,
        )));
    }

    fn link_lost(&mut self, reason: &str) {
        if self.stream.take().is_some() {
            warn!("Lost connection to bridge: {}", reason);
            self.dispatch(DaliBusEventType::LinkLost);
        }
        self.rx_buf.clear();
        while !self.pending.is_empty() {
            self.complete(BridgeReply::new(DaliSendResult::Transport(
                TransportError::Closed,
            )));
        }
    }

    fn dispatch(&self, event_type: DaliBusEventType) {
        if let Some(listener) = &self.listener {
            let event = DaliBusEvent {
                timestamp: std::time::Instant::now(),
                event_type,
            };
            if listener.try_send(event).is_err() {
                debug!("Bus event dropped");
            }
        }
    }
}
