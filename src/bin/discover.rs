use dali::cli;
use dali::common::address::Long;
use dali::error::DynResult;
use dali::DaliBus;
use dali_bridge as dali;
use log::{error, info};
use std::process::ExitCode;

extern crate clap;
use clap::{Arg, ArgMatches, Command};

fn print_long(long: Option<Long>) -> String {
    long.map(|l| format!("{:06x}", l))
        .unwrap_or_else(|| "None".to_string())
}

async fn run(matches: &ArgMatches) -> DynResult<()> {
    let bus = DaliBus::open(cli::bridge_config(matches)?)?;
    bus.reset().await?;

    if let Some(random) = matches.get_one::<String>("clear") {
        let random = Long::from_str_radix(random, 16)?;
        bus.program_short_address(random, None).await?;
        info!("Cleared short address of {:06x}", random);
    }

    let full = *matches.get_one::<bool>("full").unwrap_or(&false);
    let force = *matches.get_one::<bool>("force").unwrap_or(&false);
    if full || force {
        let res = bus.full_scan(force).await?;
        for d in &res.devices {
            println!(
                "Short: {}, Long: {}{}",
                d.short,
                print_long(d.random),
                if d.assigned { " (new address)" } else { "" }
            );
        }
        for addr in &res.unreliable {
            println!("Short: {}, unreliable", addr);
        }
        for long in &res.unassigned {
            println!("Long: {:06x}, no free short address", long);
        }
        if let Some(e) = res.error {
            println!("Discovery stopped: {}", e);
        }
    } else {
        let res = bus.bus_scan().await?;
        for addr in &res.reliable {
            let long = res
                .random_addresses
                .iter()
                .find(|(s, _)| s == addr)
                .map(|(_, l)| *l);
            println!("Short: {}, Long: {}", addr, print_long(long));
        }
        for addr in &res.unreliable {
            println!("Short: {}, unreliable", addr);
        }
        if let Some(e) = res.error {
            println!("{}. Run with --full to resolve.", e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cmd = Command::new("discover")
        .about("Discover all devices on a DALI bus")
        .arg(
            Arg::new("full")
                .long("full")
                .action(clap::ArgAction::SetTrue)
                .help("Search for devices without a short address and resolve collisions"),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .action(clap::ArgAction::SetTrue)
                .help("Search for all devices, even if the quick scan finds no problems"),
        )
        .arg(
            Arg::new("clear")
                .long("clear")
                .value_name("RANDOM")
                .help("Clear the short address of the device with this random address (hex)"),
        );
    let matches = cli::bridge_args(cmd).get_matches();
    if let Err(e) = run(&matches).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
