use super::client::{BridgeClient, ClientOptions, HIGH_WATERMARK};
use super::engine::{KEEPALIVE_INTERVAL, RESPONSE_TIMEOUT};
use super::frame::{opcode, status, ACK, DATA};
use super::transport::{BridgeStream, BridgeTransport};
use crate::common::address::Short;
use crate::common::cmd_defs::YES;
use crate::drivers::command_utils::send16;
use crate::drivers::driver::{DaliBusEventType, DaliSendResult, TransportError};
use crate::drivers::send_flags::NO_FLAG;
use crate::drivers::simulator::bridge::{SimBus, SimTransport, SIM_BRIDGE_VERSION};
use crate::drivers::simulator::gear::SimGear;
use crate::gear::cmd_defs as cmd;
use crate::utils::dyn_future::DynFutureStatic;
use crate::Error;
use std::io;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{timeout, Duration, Instant};

// Hands out one prepared stream, then refuses to connect
struct ManualTransport(Mutex<Option<DuplexStream>>);

impl ManualTransport {
    fn new(stream: DuplexStream) -> Box<ManualTransport> {
        Box::new(ManualTransport(Mutex::new(Some(stream))))
    }
}

impl BridgeTransport for ManualTransport {
    fn connect(&self) -> DynFutureStatic<io::Result<Box<dyn BridgeStream>>> {
        let res = match self.0.lock().unwrap().take() {
            Some(s) => Ok(Box::new(s) as Box<dyn BridgeStream>),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no bridge")),
        };
        Box::pin(std::future::ready(res))
    }

    fn description(&self) -> String {
        "manual".to_string()
    }
}

fn sim_client(gear: Vec<SimGear>) -> (BridgeClient, std::sync::Arc<Mutex<SimBus>>) {
    let bus = SimBus::new(gear);
    let client = BridgeClient::new(
        Box::new(SimTransport::new(bus.clone())),
        ClientOptions::default(),
    );
    (client, bus)
}

#[tokio::test]
async fn query_through_bridge() {
    let (mut client, bus) = sim_client(vec![SimGear::new(0x10).with_short(3)]);
    let present = send16::query(&mut client, cmd::QUERY_CONTROL_GEAR_PRESENT(Short::new(3)), NO_FLAG);
    let absent = send16::query(&mut client, cmd::QUERY_CONTROL_GEAR_PRESENT(Short::new(4)), NO_FLAG);
    assert!(matches!(present.await, DaliSendResult::Answer(YES)));
    assert!(absent.await.is_timeout());
    assert!(matches!(
        send16::cmd(&mut client, cmd::INITIALISE_ALL(), NO_FLAG).await,
        DaliSendResult::Ok
    ));
    assert_eq!(
        bus.lock().unwrap().log,
        vec![
            (opcode::SEND_RECEIVE, 0x07, 0x91),
            (opcode::SEND_RECEIVE, 0x09, 0x91),
            (opcode::SEND_TWICE, 0xa5, 0x00),
        ]
    );
    assert_eq!(client.outstanding(), 0);
}

#[tokio::test]
async fn preload_and_device_type() {
    let (mut client, bus) = sim_client(vec![SimGear::new(0x10).with_short(0)]);
    let r = send16::with_u16(&mut client, 0x1234, cmd::QUERY_CONTENT_DTR1(Short::new(0)), NO_FLAG).await;
    assert!(matches!(r, DaliSendResult::Answer(0x12)));
    let dt = cmd::QUERY_EXTENDED_VERSION_NUMBER(Short::new(0)).with_device_type(6);
    assert!(send16::device_type(&mut client, dt, NO_FLAG).await.is_timeout());
    let log = bus.lock().unwrap().log.clone();
    assert_eq!(
        log,
        vec![
            (opcode::SEND, 0xa3, 0x34),
            (opcode::SEND, 0xc3, 0x12),
            (opcode::SEND_RECEIVE, 0x01, 0x9c),
            (opcode::SEND, 0xc1, 0x06),
            (opcode::SEND_RECEIVE, 0x01, 0xff),
        ]
    );
}

#[tokio::test]
async fn backpressure() {
    let (client_end, mut bridge_end) = tokio::io::duplex(1024);
    let mut client = BridgeClient::new(ManualTransport::new(client_end), ClientOptions::default());
    let mut replies = Vec::new();
    for i in 0..(HIGH_WATERMARK + 2) {
        replies.push(send16::set_dtr0(&mut client, i as u8, NO_FLAG));
    }
    assert_eq!(client.outstanding(), HIGH_WATERMARK + 2);

    let mut buf = vec![0u8; 3 * HIGH_WATERMARK];
    bridge_end.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf[..3], &[opcode::SEND, 0xa3, 0x00]);
    let mut next = [0u8; 3];
    assert!(timeout(Duration::from_millis(100), bridge_end.read(&mut next))
        .await
        .is_err());

    for _ in 0..HIGH_WATERMARK {
        bridge_end.write_all(&[ACK, status::OK]).await.unwrap();
    }
    bridge_end.read_exact(&mut next).await.unwrap();
    assert_eq!(next, [opcode::SEND, 0xa3, HIGH_WATERMARK as u8]);
    // The last one waits for the response to the one before
    assert!(timeout(Duration::from_millis(100), bridge_end.read(&mut next))
        .await
        .is_err());
    bridge_end.write_all(&[ACK, status::OK]).await.unwrap();
    bridge_end.read_exact(&mut next).await.unwrap();
    assert_eq!(next, [opcode::SEND, 0xa3, HIGH_WATERMARK as u8 + 1]);
    bridge_end.write_all(&[ACK, status::OK]).await.unwrap();

    for r in replies {
        assert!(matches!(r.await, DaliSendResult::Ok));
    }
    assert_eq!(client.outstanding(), 0);
}

#[tokio::test]
async fn desync_and_link_loss() {
    let (client_end, mut bridge_end) = tokio::io::duplex(1024);
    let mut client = BridgeClient::new(ManualTransport::new(client_end), ClientOptions::default());
    let mut events = client.subscribe_events().unwrap();

    let reply = send16::query(&mut client, cmd::QUERY_CONTENT_DTR0(Short::new(1)), NO_FLAG);
    let mut buf = [0u8; 3];
    bridge_end.read_exact(&mut buf).await.unwrap();
    bridge_end.write_all(&[0x77, DATA, 0x42]).await.unwrap();
    assert!(matches!(reply.await, DaliSendResult::Answer(0x42)));
    assert_eq!(client.stats().desync_bytes, 1);

    let reply = send16::query(&mut client, cmd::QUERY_CONTENT_DTR0(Short::new(1)), NO_FLAG);
    bridge_end.read_exact(&mut buf).await.unwrap();
    drop(bridge_end);
    assert!(matches!(
        reply.await,
        DaliSendResult::Transport(TransportError::Closed)
    ));
    assert_eq!(
        events.recv().await.unwrap().event_type,
        DaliBusEventType::LinkLost
    );
    // Reconnecting fails since the manual transport is used up
    assert!(matches!(
        send16::set_dtr0(&mut client, 0, NO_FLAG).await,
        DaliSendResult::Transport(TransportError::Io(_))
    ));
    assert_eq!(client.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn response_timeout_and_late_answer() {
    let (client_end, mut bridge_end) = tokio::io::duplex(1024);
    let mut client = BridgeClient::new(ManualTransport::new(client_end), ClientOptions::default());
    let start = Instant::now();
    let reply = send16::query(&mut client, cmd::QUERY_CONTENT_DTR0(Short::new(1)), NO_FLAG);
    let mut buf = [0u8; 3];
    bridge_end.read_exact(&mut buf).await.unwrap();
    assert!(matches!(
        reply.await,
        DaliSendResult::Transport(TransportError::Timeout)
    ));
    assert!(start.elapsed() >= RESPONSE_TIMEOUT);
    assert_eq!(client.outstanding(), 0);
    assert_eq!(client.stats().timeouts, 1);

    // The answer to the timed out query must not complete the next one
    bridge_end.write_all(&[DATA, 0x42]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.stats().desync_bytes, 2);
    let reply = send16::query(&mut client, cmd::QUERY_CONTENT_DTR0(Short::new(1)), NO_FLAG);
    bridge_end.read_exact(&mut buf).await.unwrap();
    bridge_end.write_all(&[DATA, 0x43]).await.unwrap();
    assert!(matches!(reply.await, DaliSendResult::Answer(0x43)));
    assert_eq!(client.outstanding(), 0);
}

#[tokio::test]
async fn foreign_frames() {
    let (mut client, bus) = sim_client(vec![SimGear::new(0x10).with_short(3)]);
    let mut events = client.subscribe_events().unwrap();
    bus.lock().unwrap().foreign_frames.push([0xff, 0x05]);
    let r = send16::query(&mut client, cmd::QUERY_CONTROL_GEAR_PRESENT(Short::new(3)), NO_FLAG).await;
    assert!(matches!(r, DaliSendResult::Answer(YES)));
    let ev = events.recv().await.unwrap();
    assert_eq!(ev.event_type, DaliBusEventType::Frame16([0xff, 0x05]));
}

#[tokio::test]
async fn reset_sequence() {
    let bus = SimBus::new(vec![]);
    let mut options = ClientOptions::default();
    options.sending_edge_adjustment = -3;
    options.sampling_point_adjustment = 7;
    let mut client = BridgeClient::new(Box::new(SimTransport::new(bus.clone())), options);
    bus.lock().unwrap().retried_resets = 2;
    client.reset().await.unwrap();
    {
        let bus = bus.lock().unwrap();
        let ops: Vec<u8> = bus.log.iter().map(|c| c.0).collect();
        assert_eq!(
            ops,
            vec![
                opcode::RESET,
                opcode::RESET,
                opcode::RESET,
                opcode::RESET,
                opcode::RESET,
                opcode::OVERLOAD_RESET,
                opcode::EDGE_ADJUST,
                opcode::SEND,
            ]
        );
        assert_eq!(bus.edge_adjustment, (0xfd, 7));
        assert_eq!(bus.log[7], (opcode::SEND, 0xa1, 0x00));
    }
    assert_eq!(client.stats().retried, 2);
    assert_eq!(client.procedures_active(), 0);

    bus.lock().unwrap().retried_resets = 10;
    assert!(matches!(client.reset().await, Err(Error::Send(_))));
    assert_eq!(client.bridge_version().await.unwrap(), SIM_BRIDGE_VERSION);
    assert!(client.echo(0x5a, 0xa5).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn delayed_send() {
    let (mut client, _bus) = sim_client(vec![]);
    let start = Instant::now();
    client.delay_next(Duration::from_millis(100));
    send16::set_dtr0(&mut client, 1, NO_FLAG).await.check_send().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));
    let start = Instant::now();
    send16::set_dtr0(&mut client, 1, NO_FLAG).await.check_send().unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn keepalive_deferred_by_procedure() {
    let bus = SimBus::new(vec![]);
    let mut options = ClientOptions::default();
    options.single_master = true;
    let mut client = BridgeClient::new(Box::new(SimTransport::new(bus.clone())), options);
    client.reset().await.unwrap();
    let n = bus.lock().unwrap().log.len();
    let ping = (opcode::SEND, 0xad, 0x00);

    tokio::time::sleep(KEEPALIVE_INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(bus.lock().unwrap().log[n..], [ping]);

    let token = client.begin_procedure();
    tokio::time::sleep(KEEPALIVE_INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(bus.lock().unwrap().log.len(), n + 1);
    drop(token);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(bus.lock().unwrap().log[n..], [ping, ping]);
}

#[tokio::test(start_paused = true)]
async fn keepalive_follows_reset() {
    let bus = SimBus::new(vec![]);
    let mut options = ClientOptions::default();
    options.single_master = false;
    let mut client = BridgeClient::new(Box::new(SimTransport::new(bus.clone())), options);
    client.reset().await.unwrap();
    let n = bus.lock().unwrap().log.len();
    tokio::time::sleep(KEEPALIVE_INTERVAL * 2).await;
    assert_eq!(bus.lock().unwrap().log.len(), n);
}

#[tokio::test(start_paused = true)]
async fn idle_close_reconnects() {
    let bus = SimBus::new(vec![]);
    let mut options = ClientOptions::default();
    options.engine.idle_close = Some(Duration::from_secs(5));
    let mut client = BridgeClient::new(Box::new(SimTransport::new(bus.clone())), options);
    send16::set_dtr0(&mut client, 1, NO_FLAG).await.check_send().unwrap();
    send16::set_dtr0(&mut client, 2, NO_FLAG).await.check_send().unwrap();
    assert_eq!(bus.lock().unwrap().connections, 1);
    tokio::time::sleep(Duration::from_secs(6)).await;
    send16::set_dtr0(&mut client, 3, NO_FLAG).await.check_send().unwrap();
    assert_eq!(bus.lock().unwrap().connections, 2);
}
