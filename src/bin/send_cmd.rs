use dali::cli;
use dali::drivers::bridge::frame::{opcode, BridgeCommand};
use dali::error::DynResult;
use dali::DaliBus;
use dali_bridge as dali;
use log::error;
use std::process::ExitCode;

extern crate clap;
use clap::{Arg, ArgMatches, Command};

async fn run(matches: &ArgMatches) -> DynResult<()> {
    let Some(cmd_string) = matches.get_one::<String>("CMD") else {
        return Err("No command".into());
    };
    let Some(bytes) = cli::parse_hex_bytes(cmd_string) else {
        return Err("Invalid hex string".into());
    };
    let expect_answer = *matches.get_one::<bool>("answer").unwrap_or(&false);
    let send_twice = *matches.get_one::<bool>("twice").unwrap_or(&false);
    let raw = *matches.get_one::<bool>("raw").unwrap_or(&false);
    let command = match (raw, bytes.as_slice()) {
        (true, &[op]) => BridgeCommand::short(op),
        (true, &[op, d1, d2]) => BridgeCommand::new(op, d1, d2),
        (false, &[a, c]) => {
            let op = if expect_answer {
                opcode::SEND_RECEIVE
            } else if send_twice {
                opcode::SEND_TWICE
            } else {
                opcode::SEND
            };
            BridgeCommand::new(op, a, c)
        }
        _ => return Err("Invalid command length".into()),
    };
    let bus = DaliBus::open(cli::bridge_config(matches)?)?;
    let reply = bus.send_raw(command, expect_answer).await?;
    println!(
        "Result: {}{}",
        reply.result,
        if reply.retried { " (retried)" } else { "" }
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cmd = Command::new("send_cmd")
        .about("Send an arbitrary DALI frame or bridge command.")
        .arg(
            Arg::new("CMD")
                .required(true)
                .help("Hex string containing a DALI frame (two bytes) or, with --raw, a bridge command (one or three bytes)"),
        )
        .arg(
            Arg::new("answer")
                .short('a')
                .long("answer")
                .action(clap::ArgAction::SetTrue)
                .help("Expect an answer"),
        )
        .arg(
            Arg::new("twice")
                .short('t')
                .long("twice")
                .action(clap::ArgAction::SetTrue)
                .help("Send command twice"),
        )
        .arg(
            Arg::new("raw")
                .short('r')
                .long("raw")
                .action(clap::ArgAction::SetTrue)
                .help("Send CMD to the bridge as is"),
        );
    let matches = cli::bridge_args(cmd).get_matches();
    if let Err(e) = run(&matches).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
