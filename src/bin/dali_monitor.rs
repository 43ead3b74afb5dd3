use dali::cli;
use dali::common::address::BusAddress;
use dali::drivers::bridge::frame::{opcode, BridgeCommand};
use dali::drivers::driver::{DaliBusEvent, DaliBusEventType};
use dali::error::DynResult;
use dali::DaliBus;
use dali_bridge as dali;
use log::error;
use std::process::ExitCode;
use std::time::Instant;

extern crate clap;
use clap::{ArgMatches, Command};

fn describe(frame: &[u8; 2]) -> String {
    match BusAddress::decode(frame[0]) {
        Ok(addr) if BusAddress::is_command(frame[0]) => {
            format!("{} command 0x{:02x}", addr, frame[1])
        }
        Ok(addr) => format!("{} arc power {}", addr, frame[1]),
        Err(_) => format!("special command 0x{:02x} 0x{:02x}", frame[0], frame[1]),
    }
}

async fn run(matches: &ArgMatches) -> DynResult<()> {
    let bus = DaliBus::open(cli::bridge_config(matches)?)?;
    let mut events = bus.subscribe_events()?;
    let reply = bus.send_raw(BridgeCommand::short(opcode::VERSION), true).await?;
    let version = reply.result.check_answer()?;
    println!("Bridge version {}", version);

    let mut last_ts = Instant::now();
    while let Some(DaliBusEvent {
        timestamp,
        event_type,
    }) = events.recv().await
    {
        print!("{:5}:", timestamp.duration_since(last_ts).as_millis());
        last_ts = timestamp;
        match event_type {
            DaliBusEventType::Frame16(ref frame) => {
                println!(" {} {}", event_type, describe(frame))
            }
            DaliBusEventType::LinkLost => {
                println!(" {}", event_type);
                return Err("Connection to bridge lost".into());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cmd = Command::new("dali_monitor").about("Print DALI frames sent by other masters.");
    let matches = cli::bridge_args(cmd).get_matches();
    if let Err(e) = run(&matches).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
