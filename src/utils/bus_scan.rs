use crate::common::address::{Broadcast, Long, Short};
use crate::drivers::bridge::BridgeClient;
use crate::drivers::command_utils::send16;
use crate::drivers::driver::DaliSendResult;
use crate::drivers::send_flags::NO_FLAG;
use crate::gear::cmd_defs as cmd;
use crate::utils::address_set::AddressSet;
use crate::utils::reliability::test_reliability;
use crate::Error;
use log::{debug, info, warn};

/// DTR0 round trips for every address found
pub const SCAN_RELIABILITY_CYCLES: u32 = 5;

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Addresses that passed the reliability test
    pub reliable: Vec<Short>,
    /// Addresses that answered but failed the reliability test
    pub unreliable: Vec<Short>,
    /// Random addresses read from devices without collisions
    pub random_addresses: Vec<(Short, Long)>,
    /// Addresses where more than one device seems to answer
    pub collisions: AddressSet,
    /// Some device has no short address
    pub missing: bool,
    /// `AddressCollisions` or `AddressesMissing` if the scan can't be trusted
    pub error: Option<Error>,
}

impl ScanResult {
    /// All addresses that answered
    pub fn used(&self) -> AddressSet {
        self.reliable.iter().chain(self.unreliable.iter()).copied().collect()
    }
}

enum Probe {
    Absent,
    Present(Option<Long>),
    Collision,
}

// Query presence and the random address. A framing error counts as an
// answer from more than one device.
async fn probe(client: &mut BridgeClient, addr: Short) -> Result<Probe, Error> {
    let queries = [
        cmd::QUERY_CONTROL_GEAR_PRESENT(addr),
        cmd::QUERY_RANDOM_ADDRESS_H(addr),
        cmd::QUERY_RANDOM_ADDRESS_M(addr),
        cmd::QUERY_RANDOM_ADDRESS_L(addr),
    ];
    let mut present = false;
    let mut random: Option<Long> = Some(0);
    for (i, q) in queries.into_iter().enumerate() {
        match send16::query(client, q, NO_FLAG).await {
            DaliSendResult::Answer(v) => {
                present = true;
                if i > 0 {
                    random = random.map(|r| (r << 8) | v as Long);
                }
            }
            DaliSendResult::Timeout => {
                if i > 0 {
                    random = None;
                }
            }
            DaliSendResult::Framing => return Ok(Probe::Collision),
            e if e.is_severe() => return Err(e.into()),
            e => {
                debug!("{}: {}", addr, e);
                random = None;
            }
        }
    }
    if present {
        Ok(Probe::Present(random))
    } else {
        Ok(Probe::Absent)
    }
}

/// Find devices by querying every short address.
///
/// An `Err` is only returned for errors that stop the scan. Collisions and
/// missing short addresses are reported in `ScanResult::error`.
pub async fn bus_scan(client: &mut BridgeClient) -> Result<ScanResult, Error> {
    let _proc = client.begin_procedure();
    let mut result = ScanResult::default();
    match send16::query(client, cmd::QUERY_MISSING_SHORT_ADDRESS(Broadcast), NO_FLAG).await {
        DaliSendResult::Answer(_) | DaliSendResult::Framing => result.missing = true,
        DaliSendResult::Timeout => {}
        e if e.is_severe() => return Err(e.into()),
        e => warn!("Query for missing short addresses failed: {}", e),
    }

    for addr in Short::all() {
        match probe(client, addr).await? {
            Probe::Absent => continue,
            Probe::Present(random) => {
                if let Some(random) = random {
                    result.random_addresses.push((addr, random));
                }
            }
            Probe::Collision => {
                warn!("{}: more than one device answers", addr);
                result.collisions += addr;
            }
        }
        match test_reliability(client, addr, SCAN_RELIABILITY_CYCLES).await {
            Ok(()) => result.reliable.push(addr),
            Err(e) if e.is_severe() => return Err(e),
            Err(e) => {
                warn!("{}: {}", addr, e);
                result.unreliable.push(addr)
            }
        }
    }

    if !result.collisions.is_empty() {
        result.error = Some(Error::AddressCollisions);
    } else if result.missing {
        result.error = Some(Error::AddressesMissing);
    }
    info!(
        "Scan found {} reliable and {} unreliable devices",
        result.reliable.len(),
        result.unreliable.len()
    );
    Ok(result)
}
