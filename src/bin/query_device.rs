use dali::cli;
use dali::common::address::Short;
use dali::error::DynResult;
use dali::DaliBus;
use dali_bridge as dali;
use log::error;
use std::process::ExitCode;

extern crate clap;
use clap::{value_parser, Arg, ArgMatches, Command};

async fn dump_bank(bus: &DaliBus, addr: Short, bank: u8) -> DynResult<()> {
    let cells = bus.read_bank(addr, bank).await?;
    for (row, chunk) in cells.chunks(16).enumerate() {
        let line: Vec<String> = chunk.iter().map(|c| c.to_string()).collect();
        println!("{:02x}: {}", row * 16, line.join(" "));
    }
    Ok(())
}

async fn run(matches: &ArgMatches) -> DynResult<()> {
    let Some(addr) = matches.get_one::<Short>("ADDR").copied() else {
        return Err("No address".into());
    };
    let bus = DaliBus::open(cli::bridge_config(matches)?)?;
    bus.reset().await?;
    if let Some(bank) = matches.get_one::<u8>("dump") {
        return dump_bank(&bus, addr, *bank).await;
    }
    match bus.query_random_address(addr).await {
        Ok(long) => println!("Random address: {:06x}", long),
        Err(e) => println!("Random address: {}", e),
    }
    let ident = bus.read_device_info(addr).await?;
    print!("{}", ident);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cmd = Command::new("query_device")
        .about("Read identification data from a DALI device")
        .arg(
            Arg::new("ADDR")
                .required(true)
                .value_parser(value_parser!(Short))
                .help("Short address of device, 1-64"),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .value_name("BANK")
                .value_parser(value_parser!(u8))
                .help("Print the contents of a memory bank"),
        );
    let matches = cli::bridge_args(cmd).get_matches();
    if let Err(e) = run(&matches).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
