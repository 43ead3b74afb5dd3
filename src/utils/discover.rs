use crate::common::address::{Long, Short};
use crate::drivers::bridge::BridgeClient;
use crate::drivers::command_utils::send16;
use crate::drivers::driver::DaliSendResult;
use crate::drivers::send_flags::NO_FLAG;
use crate::gear::cmd_defs as cmd;
use crate::utils::address_set::AddressSet;
use crate::utils::bus_scan::{bus_scan, ScanResult};
use crate::utils::long_address::{self, LONG_MAX};
use crate::Error;
use log::{debug, info, warn};
use std::time::Duration;

/// Time for the devices to pick a new random address
pub const RANDOMISE_SETTLE: Duration = Duration::from_millis(100);
/// Time between programming a short address and verifying it
pub const PROGRAM_SETTLE: Duration = Duration::from_millis(50);
/// Extra COMPARE frames sent before trusting a "no"
const COMPARE_NO_REPEATS: u32 = 2;
const SHORT_QUERY_ATTEMPTS: u32 = 3;
const MAX_RESTARTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundDevice {
    pub short: Short,
    /// Random address if known
    pub random: Option<Long>,
    /// The short address was programmed during this discovery
    pub assigned: bool,
}

#[derive(Debug, Default)]
pub struct DiscoveryResult {
    pub devices: Vec<FoundDevice>,
    /// Addresses that failed the reliability test in the initial scan
    pub unreliable: Vec<Short>,
    /// Random addresses of devices left without a short address
    pub unassigned: Vec<Long>,
    /// Error that stopped the search. Devices found before it are still valid.
    pub error: Option<Error>,
}

impl DiscoveryResult {
    fn from_scan(scan: ScanResult) -> DiscoveryResult {
        let devices = scan
            .reliable
            .iter()
            .map(|&short| FoundDevice {
                short,
                random: scan
                    .random_addresses
                    .iter()
                    .find(|(s, _)| *s == short)
                    .map(|(_, r)| *r),
                assigned: false,
            })
            .collect();
        DiscoveryResult {
            devices,
            unreliable: scan.unreliable,
            unassigned: Vec::new(),
            error: scan.error,
        }
    }
}

struct Search {
    /// Every device below this has been withdrawn
    low: Long,
    current: Option<Long>,
    restarts: u32,
    /// Addresses of devices not taking part in the search
    used: AddressSet,
    /// Addresses with more than one device
    conflicted: AddressSet,
    /// Addresses given to devices found so far
    found: AddressSet,
    /// Devices that keep their address even if it's in `used`
    all_devices: bool,
}

impl Search {
    fn restart(&mut self) -> Result<(), Error> {
        self.restarts += 1;
        if self.restarts > MAX_RESTARTS {
            return Err(Error::DeviceSearch);
        }
        warn!("Restarting search from 0x{:06x}", self.low);
        self.current = None;
        Ok(())
    }
}

// A "no" is only trusted after it's been repeated. Several devices answering
// at once show up as framing errors.
async fn compare(client: &mut BridgeClient) -> Result<bool, Error> {
    for _ in 0..=COMPARE_NO_REPEATS {
        match send16::query(client, cmd::COMPARE(), NO_FLAG).await {
            DaliSendResult::Answer(_) | DaliSendResult::Framing => return Ok(true),
            DaliSendResult::Timeout => {}
            e if e.is_severe() => return Err(e.into()),
            e => debug!("COMPARE: {}", e),
        }
    }
    Ok(false)
}

// Short address of the selected device. Outer None if it never answered.
async fn query_selected_short(client: &mut BridgeClient) -> Result<Option<Option<Short>>, Error> {
    for _ in 0..SHORT_QUERY_ATTEMPTS {
        match send16::query(client, cmd::QUERY_SHORT_ADDRESS(), NO_FLAG).await {
            DaliSendResult::Answer(a) => match Short::from_answer(a) {
                Ok(short) => return Ok(Some(short)),
                Err(_) => warn!("Invalid short address answer 0x{:02x}", a),
            },
            e if e.is_severe() => return Err(e.into()),
            e => debug!("QUERY SHORT ADDRESS: {}", e),
        }
    }
    Ok(None)
}

// Program the selected device and check that it took
async fn program_selected(
    client: &mut BridgeClient,
    random: Long,
    short: Option<Short>,
) -> Result<(), Error> {
    send16::cmd(client, cmd::PROGRAM_SHORT_ADDRESS(short), NO_FLAG)
        .await
        .check_send()?;
    client.delay_next(PROGRAM_SETTLE);
    match send16::query(client, cmd::QUERY_SHORT_ADDRESS(), NO_FLAG).await {
        DaliSendResult::Answer(a) if Short::from_answer(a) == Ok(short) => Ok(()),
        e if e.is_severe() => Err(e.into()),
        e => {
            warn!("Verifying short address of 0x{:06x} failed: {}", random, e);
            Err(Error::AddressAssignment(random))
        }
    }
}

// Binary search for the lowest random address at or above `search.low`.
// None if there are no more devices.
async fn find_lowest(client: &mut BridgeClient, search: &mut Search) -> Result<Option<Long>, Error> {
    let mut min = search.low;
    let mut max = LONG_MAX;
    loop {
        let addr = min + (max - min) / 2;
        long_address::set_search_addr_changed(client, addr, &mut search.current).await?;
        if compare(client).await? {
            if addr == min {
                return Ok(Some(addr));
            }
            max = addr;
        } else if addr == max {
            if max == LONG_MAX {
                return Ok(None);
            }
            // A device answered earlier but is gone now
            search.restart()?;
            min = search.low;
            max = LONG_MAX;
        } else {
            min = addr + 1;
        }
    }
}

async fn search_devices(
    client: &mut BridgeClient,
    search: &mut Search,
    result: &mut DiscoveryResult,
) -> Result<(), Error> {
    while let Some(random) = find_lowest(client, search).await? {
        let current = match query_selected_short(client).await? {
            Some(current) => current,
            None => {
                warn!("Device 0x{:06x} doesn't report its short address", random);
                search.restart()?;
                continue;
            }
        };
        let keep = current.filter(|s| {
            !search.found.contains(*s) && (search.all_devices || !search.used.contains(*s))
        });
        match keep {
            Some(short) => {
                info!("Found {} at 0x{:06x}", short, random);
                search.found += short;
                result.devices.push(FoundDevice {
                    short,
                    random: Some(random),
                    assigned: false,
                });
            }
            None => {
                let taken = search.used + &search.found + &search.conflicted;
                match taken.highest_free() {
                    Some(short) => {
                        program_selected(client, random, Some(short)).await?;
                        info!("Assigned {} to 0x{:06x}", short, random);
                        search.found += short;
                        result.devices.push(FoundDevice {
                            short,
                            random: Some(random),
                            assigned: true,
                        });
                    }
                    None => {
                        warn!("No free short address for 0x{:06x}", random);
                        program_selected(client, random, None).await?;
                        result.unassigned.push(random);
                    }
                }
            }
        }
        send16::cmd(client, cmd::WITHDRAW(), NO_FLAG)
            .await
            .check_send()?;
        if random == LONG_MAX {
            break;
        }
        search.low = random + 1;
    }
    Ok(())
}

/// Find all devices and give each of them a unique short address.
///
/// Starts with a quick scan. If that finds no problems and `force` isn't
/// set, its result is returned. Otherwise devices are found by a random
/// address search. Only devices without a short address take part, unless
/// `force` is set or the scan found collisions.
///
/// Errors during the search are returned in `DiscoveryResult::error` along
/// with the devices found before it.
pub async fn full_scan(client: &mut BridgeClient, force: bool) -> Result<DiscoveryResult, Error> {
    let _proc = client.begin_procedure();
    let scan = bus_scan(client).await?;
    if scan.error.is_none() && !force {
        return Ok(DiscoveryResult::from_scan(scan));
    }
    let all_devices = force || !scan.collisions.is_empty();
    let mut search = Search {
        low: 0,
        current: None,
        restarts: 0,
        used: scan.used(),
        conflicted: scan.collisions,
        found: AddressSet::new(),
        all_devices,
    };
    let mut result = DiscoveryResult::from_scan(scan);
    result.error = None;
    if all_devices {
        result.devices.clear();
    }
    info!(
        "Searching for {}",
        if all_devices {
            "all devices"
        } else {
            "devices without short address"
        }
    );

    let init = if all_devices {
        cmd::INITIALISE_ALL()
    } else {
        cmd::INITIALISE_NO_ADDR()
    };
    let setup = async {
        send16::cmd(client, cmd::TERMINATE(), NO_FLAG).await.check_send()?;
        send16::cmd(client, init, NO_FLAG).await.check_send()?;
        send16::cmd(client, cmd::RANDOMISE(), NO_FLAG).await.check_send()?;
        client.delay_next(RANDOMISE_SETTLE);
        Ok::<(), Error>(())
    };
    let res = match setup.await {
        Ok(()) => search_devices(client, &mut search, &mut result).await,
        Err(e) => Err(e),
    };
    if let Err(e) = res {
        warn!("Device search stopped: {}", e);
        result.error = Some(e);
    }
    if let Err(e) = send16::cmd(client, cmd::TERMINATE(), NO_FLAG).await.check_send() {
        warn!("Failed to leave addressing mode: {}", e);
    }
    result.devices.sort_by_key(|d| d.short);
    Ok(result)
}

/// Set the short address of the device with random address `random`.
/// `None` removes the short address.
pub async fn program_short_address(
    client: &mut BridgeClient,
    random: Long,
    short: Option<Short>,
) -> Result<(), Error> {
    let _proc = client.begin_procedure();
    let res = async {
        send16::cmd(client, cmd::TERMINATE(), NO_FLAG).await.check_send()?;
        send16::cmd(client, cmd::INITIALISE_ALL(), NO_FLAG)
            .await
            .check_send()?;
        long_address::set_search_addr(client, random).await?;
        program_selected(client, random, short).await
    }
    .await;
    send16::cmd(client, cmd::TERMINATE(), NO_FLAG).await.check_send()?;
    res
}

pub async fn clear_short_address(client: &mut BridgeClient, random: Long) -> Result<(), Error> {
    program_short_address(client, random, None).await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::cmd_defs::MASK;
    use crate::drivers::bridge::client::ClientOptions;
    use crate::drivers::simulator::bridge::{SimBus, SimTransport};
    use crate::drivers::simulator::gear::SimGear;
    use std::sync::{Arc, Mutex};

    fn client_for(gear: Vec<SimGear>) -> (BridgeClient, Arc<Mutex<SimBus>>) {
        let bus = SimBus::new(gear);
        let client = BridgeClient::new(
            Box::new(SimTransport::new(bus.clone())),
            ClientOptions::default(),
        );
        (client, bus)
    }

    fn shorts(bus: &Arc<Mutex<SimBus>>) -> Vec<u8> {
        bus.lock().unwrap().gear.iter().map(|g| g.short_address).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn assign_missing() {
        let (mut client, bus) = client_for(vec![
            SimGear::new(0x345679),
            SimGear::new(0x000010),
            SimGear::new(0x800000).with_short(63),
            SimGear::new(0xffffff),
            SimGear::new(0x345678),
        ]);
        let res = full_scan(&mut client, false).await.unwrap();
        assert!(res.error.is_none());
        assert!(res.unassigned.is_empty());
        assert_eq!(res.devices.len(), 5);
        let new: Vec<(u8, Option<Long>)> = res
            .devices
            .iter()
            .filter(|d| d.assigned)
            .map(|d| (d.short.value(), d.random))
            .collect();
        // Highest free address first, in random address order
        assert_eq!(
            new,
            vec![
                (59, Some(0xffffff)),
                (60, Some(0x345679)),
                (61, Some(0x345678)),
                (62, Some(0x000010)),
            ]
        );
        assert_eq!(shorts(&bus), vec![60, 62, 63, 59, 61]);
        assert_eq!(client.procedures_active(), 0);

        // Nothing left to do
        let res = full_scan(&mut client, false).await.unwrap();
        assert!(res.error.is_none());
        assert_eq!(res.devices.len(), 5);
        assert!(res.devices.iter().all(|d| !d.assigned));
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_collision() {
        let (mut client, bus) = client_for(vec![
            SimGear::new(0x100000).with_short(9),
            SimGear::new(0x200000).with_short(9),
            SimGear::new(0x300000).with_short(4),
        ]);
        let res = full_scan(&mut client, false).await.unwrap();
        assert!(res.error.is_none());
        assert_eq!(res.unreliable, vec![Short::new(9)]);
        assert_eq!(
            res.devices,
            vec![
                FoundDevice {
                    short: Short::new(4),
                    random: Some(0x300000),
                    assigned: false
                },
                FoundDevice {
                    short: Short::new(9),
                    random: Some(0x100000),
                    assigned: false
                },
                FoundDevice {
                    short: Short::new(63),
                    random: Some(0x200000),
                    assigned: true
                },
            ]
        );
        assert_eq!(shorts(&bus), vec![9, 63, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn address_pool_exhausted() {
        let mut gear: Vec<SimGear> = (0..64u32)
            .map(|a| SimGear::new(0x010000 + a).with_short(a as u8))
            .collect();
        gear.push(SimGear::new(0x000001));
        let (mut client, bus) = client_for(gear);
        let res = full_scan(&mut client, false).await.unwrap();
        assert!(res.error.is_none());
        assert_eq!(res.devices.len(), 64);
        assert_eq!(res.unassigned, vec![0x000001]);
        assert_eq!(bus.lock().unwrap().gear[64].short_address, MASK);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_random_addresses() {
        // The pair can never be isolated, so the search gives up
        let (mut client, bus) = client_for(vec![
            SimGear::new(0x200000),
            SimGear::new(0x200000),
            SimGear::new(0x100000),
        ]);
        let res = full_scan(&mut client, false).await.unwrap();
        assert!(matches!(res.error, Some(Error::DeviceSearch)));
        assert_eq!(
            res.devices,
            vec![FoundDevice {
                short: Short::new(63),
                random: Some(0x100000),
                assigned: true
            }]
        );
        assert_eq!(shorts(&bus), vec![MASK, MASK, 63]);
        assert_eq!(client.procedures_active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn program_by_random_address() {
        let (mut client, bus) = client_for(vec![
            SimGear::new(0x123456).with_short(5),
            SimGear::new(0x654321).with_short(6),
        ]);
        program_short_address(&mut client, 0x123456, Some(Short::new(7)))
            .await
            .unwrap();
        assert_eq!(shorts(&bus), vec![7, 6]);
        clear_short_address(&mut client, 0x654321).await.unwrap();
        assert_eq!(shorts(&bus), vec![7, MASK]);
        assert!(matches!(
            program_short_address(&mut client, 0x111111, Some(Short::new(1))).await,
            Err(Error::AddressAssignment(0x111111))
        ));
    }
}
