use dali::cli;
use dali::common::address::Short;
use dali::error::DynResult;
use dali::DaliBus;
use dali_bridge as dali;
use log::error;
use std::process::ExitCode;

extern crate clap;
use clap::{value_parser, Arg, ArgMatches, Command};

async fn run(matches: &ArgMatches) -> DynResult<()> {
    let Some(addr) = matches.get_one::<Short>("ADDR").copied() else {
        return Err("No address".into());
    };
    let cycles = matches.get_one::<u32>("cycles").copied().unwrap_or(10);
    let bus = DaliBus::open(cli::bridge_config(matches)?)?;
    match bus.test_reliability(addr, cycles).await {
        Ok(()) => println!("{}: all {} cycles passed", addr, cycles),
        Err(e) if e.is_severe() => return Err(e.into()),
        Err(e) => println!("{}: {}", addr, e),
    }
    let stats = bus.stats();
    println!(
        "Retried: {}, timeouts: {}, discarded bytes: {}",
        stats.retried, stats.timeouts, stats.desync_bytes
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cmd = Command::new("reliability")
        .about("Check communication with a device by writing and reading back DTR0")
        .arg(
            Arg::new("ADDR")
                .required(true)
                .value_parser(value_parser!(Short))
                .help("Short address of device, 1-64"),
        )
        .arg(
            Arg::new("cycles")
                .short('n')
                .long("cycles")
                .value_parser(value_parser!(u32))
                .default_value("10")
                .help("Number of write and read cycles"),
        );
    let matches = cli::bridge_args(cmd).get_matches();
    if let Err(e) = run(&matches).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
