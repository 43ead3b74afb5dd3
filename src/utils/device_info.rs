use crate::common::address::Short;
use crate::drivers::bridge::BridgeClient;
use crate::drivers::command_utils::send16;
use crate::drivers::send_flags::NO_FLAG;
use crate::gear::cmd_defs as cmd;
use crate::utils::memory_banks::{read_memory, MemoryCell, MemoryError};
use crate::Error;
use log::{debug, info, warn};
use std::fmt;

pub const BANK0_MIN_LAST_DALI1: u8 = 0x0e;
pub const BANK0_MIN_LAST_DALI2: u8 = 0x1a;
pub const BANK1_MIN_LAST: u8 = 0x10;
const BANK_READ_ATTEMPTS: u32 = 3;

const GTIN: usize = 0x03;
const GTIN_END: usize = 0x08;
const FIRMWARE: usize = 0x09;
const SERIAL: usize = 0x0b;
const SERIAL_END_DALI1: usize = 0x0e;
const SERIAL_END_DALI2: usize = 0x12;
const VERSIONS: usize = 0x15;
const LOGICAL_UNIT_INDEX: usize = 0x1a;
const OEM_SERIAL: usize = 0x09;
const OEM_SERIAL_END: usize = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityStatus {
    /// Not read yet
    #[default]
    NeedsQuery,
    /// Identification missing or not trustworthy
    None,
    /// Valid GTIN but no usable serial number
    OnlyGtin,
    /// Valid GTIN and serial number
    Solid,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    pub gtin: Option<u64>,
    pub serial: Option<u64>,
    pub oem_gtin: Option<u64>,
    pub oem_serial: Option<u64>,
    pub firmware_major: u8,
    pub firmware_minor: u8,
    /// Versions of part 101, 102 and 103. 0xff if not implemented.
    pub versions: [u8; 3],
    pub logical_unit_index: Option<u8>,
    /// Answer to QUERY VERSION NUMBER
    pub version: u8,
    /// Read using DALI-2 rules
    pub dali2: bool,
    pub status: IdentityStatus,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceInfoOptions {
    /// Treat every device as DALI-1
    pub dali2_scan_lock: bool,
    /// Also accept checksums calculated without the last byte of the bank
    pub legacy_checksum_compat: bool,
    /// GTINs of products known to share serial numbers between units.
    /// The serial number of these is ignored.
    pub gtin_denylist: Vec<u64>,
}

fn version_str(ver: u8) -> String {
    if ver == 0xff {
        String::from("-")
    } else {
        format!("{}.{}", ver >> 2, ver & 3)
    }
}

fn opt_str(v: Option<u64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| String::from("-"))
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GTIN: {}", opt_str(self.gtin))?;
        writeln!(f, "Serial number: {}", opt_str(self.serial))?;
        writeln!(
            f,
            "Firmware version: {}.{}",
            self.firmware_major, self.firmware_minor
        )?;
        writeln!(f, "101 version number: {}", version_str(self.versions[0]))?;
        writeln!(f, "102 version number: {}", version_str(self.versions[1]))?;
        writeln!(f, "103 version number: {}", version_str(self.versions[2]))?;
        if let Some(index) = self.logical_unit_index {
            writeln!(f, "Index of this logical control gear unit: {}", index)?;
        }
        if self.oem_gtin.is_some() || self.oem_serial.is_some() {
            writeln!(f, "OEM GTIN: {}", opt_str(self.oem_gtin))?;
            writeln!(f, "OEM serial number: {}", opt_str(self.oem_serial))?;
        }
        writeln!(f, "Status: {:?}", self.status)?;
        Ok(())
    }
}

/// Validate the GS1 check digit, the least significant decimal digit
pub fn gtin_check_digit_valid(gtin: u64) -> bool {
    let check = gtin % 10;
    let mut body = gtin / 10;
    let mut sum = 0;
    let mut weight = 3;
    while body > 0 {
        sum += (body % 10) * weight;
        weight = 4 - weight;
        body /= 10;
    }
    (10 - sum % 10) % 10 == check
}

/// Check the additive checksum of a bank. `bank[0]` is the last offset
/// and `bank[1]` the checksum. With `legacy` set, a checksum that leaves
/// out the last byte is also accepted.
pub fn bank_checksum_ok(bank: &[MemoryCell], legacy: bool) -> bool {
    if bank.len() < 3 || bank[1..].iter().any(|c| c.no_data) {
        return false;
    }
    let sum = |cells: &[MemoryCell]| cells.iter().fold(0u8, |s, c| s.wrapping_add(c.value));
    if sum(&bank[1..]) == 0 {
        return true;
    }
    legacy && sum(&bank[1..bank.len() - 1]) == 0
}

// Big endian value, None if all bytes are 0xff
fn field_value(cells: &[MemoryCell]) -> Option<u64> {
    if cells.iter().all(|c| c.value == 0xff) {
        None
    } else {
        Some(cells.iter().fold(0u64, |v, c| (v << 8) | c.value as u64))
    }
}

fn longest_run(bytes: &[u8], matches: impl Fn(u8, u8) -> bool) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut prev = None;
    for &b in bytes {
        run = match prev {
            Some(p) if matches(p, b) => run + 1,
            _ if matches(b, b) => 1,
            _ => 0,
        };
        prev = Some(b);
        longest = longest.max(run);
    }
    longest
}

/// Patterns seen from devices with broken identification data
pub fn identification_plausible(bytes: &[u8]) -> bool {
    if longest_run(bytes, |a, b| a == b) >= 10 {
        return false;
    }
    let ff_count = bytes.iter().filter(|&&b| b == 0xff).count();
    let ff_run = longest_run(bytes, |a, b| a == 0xff && b == 0xff);
    !(ff_count >= 6 && ff_run >= 3)
}

#[derive(Clone, Copy)]
enum Verify {
    Checksum,
    /// Read offsets 3 up to and including this one again
    Reread(usize),
    Unchecked,
}

async fn read_bank_verified(
    client: &mut BridgeClient,
    addr: Short,
    bank: u8,
    min_last: u8,
    verify: Verify,
    legacy_checksum: bool,
) -> Result<Vec<MemoryCell>, Error> {
    for attempt in 1..=BANK_READ_ATTEMPTS {
        let mut cells = read_memory(client, addr, bank, 0, 3).await?;
        let last = cells[0].get().unwrap_or(0);
        if cells[0].no_data || last < min_last {
            return Err(MemoryError::InvalidMemoryArea { bank, last }.into());
        }
        cells.extend(read_memory(client, addr, bank, 3, last as usize - 2).await?);
        let ok = match verify {
            Verify::Checksum => bank_checksum_ok(&cells, legacy_checksum),
            Verify::Reread(end) => {
                let again = read_memory(client, addr, bank, 3, end - 2).await?;
                again[..] == cells[3..=end]
            }
            Verify::Unchecked => true,
        };
        if ok {
            return Ok(cells);
        }
        warn!(
            "{}: bank {} failed verification (attempt {} of {})",
            addr, bank, attempt, BANK_READ_ATTEMPTS
        );
    }
    Err(Error::BadData(format!(
        "{}: memory bank {} failed verification",
        addr, bank
    )))
}

fn parse_bank0(bank: &[MemoryCell], dali2: bool, denylist: &[u64], ident: &mut DeviceIdentity) {
    let serial_end = if dali2 {
        SERIAL_END_DALI2
    } else {
        SERIAL_END_DALI1
    };
    let last = bank.len() - 1;
    ident.firmware_major = bank[FIRMWARE].value;
    ident.firmware_minor = bank[FIRMWARE + 1].value;
    ident.versions = if last >= VERSIONS + 2 {
        [
            bank[VERSIONS].value,
            bank[VERSIONS + 1].value,
            bank[VERSIONS + 2].value,
        ]
    } else {
        [0xff; 3]
    };
    ident.logical_unit_index = if dali2 && last >= LOGICAL_UNIT_INDEX {
        bank[LOGICAL_UNIT_INDEX].get()
    } else {
        None
    };

    let id_field = &bank[GTIN..=serial_end];
    if id_field.iter().any(|c| c.no_data) {
        warn!("Identification field incomplete");
        ident.status = IdentityStatus::None;
        return;
    }
    ident.gtin = field_value(&bank[GTIN..=GTIN_END]);
    ident.serial = field_value(&bank[SERIAL..=serial_end]);

    // A missing serial number is not part of the check
    let checked_end = if ident.serial.is_some() {
        serial_end
    } else {
        SERIAL - 1
    };
    let bytes: Vec<u8> = bank[GTIN..=checked_end].iter().map(|c| c.value).collect();
    let plausible = identification_plausible(&bytes);
    if !plausible {
        warn!("Implausible identification data: {:02x?}", bytes);
    }

    ident.status = match ident.gtin {
        None => IdentityStatus::None,
        Some(gtin) if !gtin_check_digit_valid(gtin) => {
            warn!("GTIN {} has an invalid check digit", gtin);
            IdentityStatus::None
        }
        Some(_) if !plausible => IdentityStatus::None,
        Some(gtin) if denylist.contains(&gtin) => {
            debug!("GTIN {} is denylisted, ignoring serial number", gtin);
            ident.serial = None;
            IdentityStatus::OnlyGtin
        }
        Some(_) if ident.serial.is_none() => IdentityStatus::OnlyGtin,
        Some(_) => IdentityStatus::Solid,
    };
}

/// Read and classify the identification data in memory bank 0 and the OEM
/// data in bank 1
pub async fn read_device_info(
    client: &mut BridgeClient,
    addr: Short,
    options: DeviceInfoOptions,
) -> Result<DeviceIdentity, Error> {
    let _proc = client.begin_procedure();
    let version = send16::query(client, cmd::QUERY_VERSION_NUMBER(addr), NO_FLAG)
        .await
        .check_answer()?;
    // DALI-1 devices answer with the plain major version
    let major = if version < 4 { version } else { version >> 2 };
    let dali2 = major >= 2 && !options.dali2_scan_lock;
    let (min_last, verify) = if dali2 {
        (BANK0_MIN_LAST_DALI2, Verify::Reread(SERIAL_END_DALI2))
    } else {
        (BANK0_MIN_LAST_DALI1, Verify::Checksum)
    };
    let bank0 = read_bank_verified(
        client,
        addr,
        0,
        min_last,
        verify,
        options.legacy_checksum_compat,
    )
    .await?;
    let mut ident = DeviceIdentity {
        version,
        dali2,
        ..DeviceIdentity::default()
    };
    parse_bank0(&bank0, dali2, &options.gtin_denylist, &mut ident);

    if bank0[2].get().unwrap_or(0) >= 1 {
        let verify = if dali2 {
            Verify::Unchecked
        } else {
            Verify::Checksum
        };
        match read_bank_verified(
            client,
            addr,
            1,
            BANK1_MIN_LAST,
            verify,
            options.legacy_checksum_compat,
        )
        .await
        {
            Ok(bank1) => {
                if bank1[GTIN..=OEM_SERIAL_END].iter().any(|c| c.no_data) {
                    warn!("{}: OEM identification incomplete", addr);
                } else {
                    ident.oem_gtin = field_value(&bank1[GTIN..=GTIN_END]);
                    ident.oem_serial = field_value(&bank1[OEM_SERIAL..=OEM_SERIAL_END]);
                }
            }
            Err(e) if e.is_severe() => return Err(e),
            Err(e) => warn!("{}: reading OEM bank failed: {}", addr, e),
        }
    }
    info!("{}: identification {:?}", addr, ident.status);
    Ok(ident)
}
