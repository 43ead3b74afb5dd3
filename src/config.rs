use crate::Error;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Connection and behaviour settings for one bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Serial device path or `host:port`
    pub target: String,
    /// `<baud>,<bits>,<parity>,<stopbits>`, serial only
    pub byte_format: String,
    /// Accept TCP bridges that aren't on the loopback interface
    pub allow_non_local: bool,
    /// Close the connection after this many idle seconds. 0 keeps it open.
    pub idle_close_secs: u64,
    /// Sending edge delay in 1/256 bit times
    pub sending_edge_adjustment: i8,
    /// Sampling point delay in 1/256 bit times
    pub sampling_point_adjustment: i8,
    /// This is the only master on the bus and sends the keepalive PING
    pub single_master: bool,
    /// Treat every device as DALI-1 when reading identification data
    pub dali2_scan_lock: bool,
    /// Accept the bank 0 checksum computed without the last byte.
    /// Only needed for identities recorded by old installations.
    pub legacy_checksum_compat: bool,
    /// GTINs of products whose serial numbers aren't unique
    pub gtin_denylist: Vec<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            target: "/dev/ttyUSB0".to_string(),
            byte_format: "9600,8,N,1".to_string(),
            allow_non_local: false,
            idle_close_secs: 0,
            sending_edge_adjustment: 0,
            sampling_point_adjustment: 0,
            single_master: true,
            dali2_scan_lock: false,
            legacy_checksum_compat: false,
            gtin_denylist: Vec::new(),
        }
    }
}

fn parse_param<T: FromStr>(params: &HashMap<String, String>, name: &str, value: &mut T) -> Result<(), Error> {
    if let Some(s) = params.get(name) {
        *value = T::from_str(s.trim())
            .map_err(|_| Error::Config(format!("{} has invalid value", name)))?;
    }
    Ok(())
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> Result<BridgeConfig, Error> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<BridgeConfig, Error> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Build from `key=value` parameters. Unknown keys are rejected.
    pub fn from_params(params: &HashMap<String, String>) -> Result<BridgeConfig, Error> {
        let mut conf = BridgeConfig::default();
        conf.apply_params(params)?;
        Ok(conf)
    }

    /// Override settings with `key=value` parameters
    pub fn apply_params(&mut self, params: &HashMap<String, String>) -> Result<(), Error> {
        const KNOWN: [&str; 10] = [
            "target",
            "byte_format",
            "allow_non_local",
            "idle_close_secs",
            "sending_edge_adjustment",
            "sampling_point_adjustment",
            "single_master",
            "dali2_scan_lock",
            "legacy_checksum_compat",
            "gtin_denylist",
        ];
        if let Some(k) = params.keys().find(|k| !KNOWN.contains(&k.as_str())) {
            return Err(Error::Config(format!("Unknown parameter {}", k)));
        }
        if let Some(t) = params.get("target") {
            self.target = t.clone();
        }
        if let Some(f) = params.get("byte_format") {
            self.byte_format = f.clone();
        }
        parse_param(params, "allow_non_local", &mut self.allow_non_local)?;
        parse_param(params, "idle_close_secs", &mut self.idle_close_secs)?;
        parse_param(params, "sending_edge_adjustment", &mut self.sending_edge_adjustment)?;
        parse_param(params, "sampling_point_adjustment", &mut self.sampling_point_adjustment)?;
        parse_param(params, "single_master", &mut self.single_master)?;
        parse_param(params, "dali2_scan_lock", &mut self.dali2_scan_lock)?;
        parse_param(params, "legacy_checksum_compat", &mut self.legacy_checksum_compat)?;
        if let Some(list) = params.get("gtin_denylist") {
            self.gtin_denylist = list
                .split(',')
                .filter(|g| !g.trim().is_empty())
                .map(|g| g.trim().parse::<u64>())
                .collect::<Result<_, _>>()
                .map_err(|_| Error::Config("gtin_denylist has invalid value".to_string()))?;
        }
        Ok(())
    }

    /// Configuration for the command line tools: an optional JSON file,
    /// then `name=value;...` overrides
    pub fn from_command_line(file: Option<&str>, params: Option<&str>) -> Result<BridgeConfig, Error> {
        let mut conf = match file {
            Some(path) => Self::load(Path::new(path))?,
            None => BridgeConfig::default(),
        };
        if let Some(params) = params {
            conf.apply_params(&parse_param_list(params)?)?;
        }
        Ok(conf)
    }

    pub fn idle_close(&self) -> Option<Duration> {
        if self.idle_close_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_close_secs))
        }
    }

    /// True if the target names a TCP endpoint rather than a serial device
    pub fn is_tcp(&self) -> bool {
        !self.target.starts_with('/') && self.target.contains(':')
    }
}

/// Parse `name=value;name=value` as used on the command line
pub fn parse_param_list(s: &str) -> Result<HashMap<String, String>, Error> {
    let mut params = HashMap::new();
    for p in s.split(';').filter(|p| !p.is_empty()) {
        let Some((name, value)) = p.split_once('=') else {
            return Err(Error::Config(format!("Parameter {} has no value", p)));
        };
        params.insert(name.trim().to_string(), value.to_string());
    }
    Ok(params)
}
