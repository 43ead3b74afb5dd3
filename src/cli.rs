//! Options shared by the command line tools

use crate::config::BridgeConfig;
use crate::Error;
use clap::{Arg, ArgMatches, Command};

/// Add the bridge selection options to `cmd`
pub fn bridge_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("DEVICE")
            .short('d')
            .long("device")
            .help("Serial device or host:port of the bridge"),
    )
    .arg(
        Arg::new("config")
            .short('c')
            .long("config")
            .help("JSON file with bridge settings"),
    )
    .arg(
        Arg::new("params")
            .short('p')
            .long("params")
            .help("Bridge settings as name=value;name=value"),
    )
}

pub fn bridge_config(matches: &ArgMatches) -> Result<BridgeConfig, Error> {
    let mut conf = BridgeConfig::from_command_line(
        matches.get_one::<String>("config").map(String::as_str),
        matches.get_one::<String>("params").map(String::as_str),
    )?;
    if let Some(device) = matches.get_one::<String>("DEVICE") {
        conf.target = device.clone();
    }
    Ok(conf)
}

/// Parse a hex string, ignoring white space
pub fn parse_hex_bytes(s: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = s
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<_>>()?;
    if digits.len() % 2 != 0 {
        return None;
    }
    Some(digits.chunks(2).map(|d| (d[0] << 4) | d[1]).collect())
}
