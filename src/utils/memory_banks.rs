use crate::common::address::Short;
use crate::drivers::bridge::BridgeClient;
use crate::drivers::command_utils::send16;
use crate::drivers::driver::DaliSendResult;
use crate::drivers::send_flags::{EXPECT_ANSWER, NO_FLAG};
use crate::gear::cmd_defs as cmd;
use crate::Error;
use log::{debug, warn};
use std::fmt;

/// Failed reads in a row before giving up
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    TooManyFailures { bank: u8, offset: u8 },
    /// The bank doesn't exist or is shorter than required
    InvalidMemoryArea { bank: u8, last: u8 },
}

impl std::error::Error for MemoryError {}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::TooManyFailures { bank, offset } => write!(
                f,
                "Reading memory bank {} failed repeatedly at offset 0x{:02x}",
                bank, offset
            ),
            MemoryError::InvalidMemoryArea { bank, last } => write!(
                f,
                "Memory bank {} is unimplemented or too short (last offset 0x{:02x})",
                bank, last
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryCell {
    pub value: u8,
    /// The device didn't answer for this location
    pub no_data: bool,
}

impl MemoryCell {
    pub fn data(value: u8) -> MemoryCell {
        MemoryCell {
            value,
            no_data: false,
        }
    }

    pub fn get(&self) -> Option<u8> {
        if self.no_data {
            None
        } else {
            Some(self.value)
        }
    }
}

impl fmt::Display for MemoryCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.no_data {
            write!(f, "--")
        } else {
            write!(f, "{:02x}", self.value)
        }
    }
}

/// Read `length` memory locations starting at `start` in `bank`.
///
/// DTR0 is set again after every location without an answer and after every
/// answer the bridge retried, since the device may have advanced DTR0 more
/// than once.
pub async fn read_memory(
    client: &mut BridgeClient,
    addr: Short,
    bank: u8,
    start: u8,
    length: usize,
) -> Result<Vec<MemoryCell>, Error> {
    if start as usize + length > 0x100 {
        return Err(MemoryError::InvalidMemoryArea { bank, last: 0xff }.into());
    }
    let _proc = client.begin_procedure();
    send16::set_dtr1(client, bank, NO_FLAG).await.check_send()?;
    let mut cells = Vec::with_capacity(length);
    let mut offset = start;
    let mut homed = false;
    let mut failures = 0;
    while cells.len() < length {
        if failures >= MAX_CONSECUTIVE_FAILURES {
            return Err(MemoryError::TooManyFailures { bank, offset }.into());
        }
        if !homed {
            match send16::set_dtr0(client, offset, NO_FLAG).await {
                DaliSendResult::Ok => homed = true,
                e if e.is_severe() => return Err(e.into()),
                e => {
                    debug!("Setting DTR0 failed: {}", e);
                    failures += 1;
                    continue;
                }
            }
        }
        let reply = client
            .send_frame16(cmd::READ_MEMORY_LOCATION(addr).0, EXPECT_ANSWER)
            .await;
        match reply.result {
            e if e.is_severe() => return Err(e.into()),
            _ if reply.retried => {
                debug!("Retried read at {}:0x{:02x}, restarting from there", bank, offset);
                homed = false;
                failures += 1;
                continue;
            }
            DaliSendResult::Answer(value) => cells.push(MemoryCell::data(value)),
            DaliSendResult::Timeout => {
                cells.push(MemoryCell {
                    value: 0,
                    no_data: true,
                });
                homed = false;
            }
            e => {
                warn!("Reading {}:0x{:02x} failed: {}", bank, offset, e);
                homed = false;
                failures += 1;
                continue;
            }
        }
        failures = 0;
        offset = offset.wrapping_add(1);
    }
    Ok(cells)
}

/// Read a whole bank. The first location holds the last offset.
pub async fn read_bank(client: &mut BridgeClient, addr: Short, bank: u8) -> Result<Vec<MemoryCell>, Error> {
    let header = read_memory(client, addr, bank, 0, 1).await?;
    let last = match header.first().and_then(MemoryCell::get) {
        Some(last) => last,
        None => return Err(MemoryError::InvalidMemoryArea { bank, last: 0 }.into()),
    };
    let mut cells = header;
    cells.extend(read_memory(client, addr, bank, 1, last as usize).await?);
    Ok(cells)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drivers::bridge::client::ClientOptions;
    use crate::drivers::bridge::frame::opcode;
    use crate::drivers::simulator::bridge::{SimBus, SimTransport};
    use crate::drivers::simulator::gear::SimGear;
    use std::sync::{Arc, Mutex};

    const BANK: [u8; 6] = [0x05, 0x11, 0x22, 0x33, 0x44, 0x55];

    fn client_for(gear: Vec<SimGear>) -> (BridgeClient, Arc<Mutex<SimBus>>) {
        let bus = SimBus::new(gear);
        let client = BridgeClient::new(
            Box::new(SimTransport::new(bus.clone())),
            ClientOptions::default(),
        );
        (client, bus)
    }

    fn gear_with_bank() -> SimGear {
        let mut gear = SimGear::new(1).with_short(2);
        gear.banks.push(BANK.to_vec());
        gear
    }

    #[tokio::test]
    async fn read_with_gaps() {
        let mut gear = gear_with_bank();
        gear.silent_cells.push((0, 3));
        let (mut client, _bus) = client_for(vec![gear]);
        let cells = read_memory(&mut client, Short::new(2), 0, 1, 6).await.unwrap();
        let text: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        assert_eq!(text, vec!["11", "22", "--", "44", "55", "--"]);
        assert_eq!(cells[1].get(), Some(0x22));
        assert_eq!(cells[2].get(), None);
    }

    #[tokio::test]
    async fn retried_read_rehomes() {
        let (mut client, bus) = client_for(vec![gear_with_bank()]);
        bus.lock().unwrap().retried_queries.push(2);
        let cells = read_bank(&mut client, Short::new(2), 0).await.unwrap();
        let values: Vec<u8> = cells.iter().map(|c| c.value).collect();
        assert_eq!(values, BANK.to_vec());
        let dtr0_writes: Vec<u8> = bus
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|c| c.0 == opcode::SEND && c.1 == 0xa3)
            .map(|c| c.2)
            .collect();
        assert_eq!(dtr0_writes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failures_and_missing_banks() {
        // Two devices on the same address garble every answer
        let (mut client, bus) = client_for(vec![gear_with_bank(), gear_with_bank()]);
        assert!(matches!(
            read_memory(&mut client, Short::new(2), 0, 0, 4).await,
            Err(Error::Memory(MemoryError::TooManyFailures { bank: 0, offset: 0 }))
        ));
        let reads = bus
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|c| c.0 == opcode::SEND_RECEIVE && c.2 == cmd::opcode::READ_MEMORY_LOCATION)
            .count();
        assert_eq!(reads, MAX_CONSECUTIVE_FAILURES as usize);

        let (mut client, _bus) = client_for(vec![gear_with_bank()]);
        assert!(matches!(
            read_bank(&mut client, Short::new(2), 1).await,
            Err(Error::Memory(MemoryError::InvalidMemoryArea { bank: 1, .. }))
        ));
        assert!(matches!(
            read_memory(&mut client, Short::new(2), 0, 0xf0, 0x20).await,
            Err(Error::Memory(MemoryError::InvalidMemoryArea { .. }))
        ));
    }

    #[tokio::test]
    async fn overload_stops_read() {
        let (mut client, bus) = client_for(vec![gear_with_bank()]);
        bus.lock().unwrap().overload = true;
        assert!(matches!(
            read_memory(&mut client, Short::new(2), 0, 0, 4).await,
            Err(Error::Send(DaliSendResult::Overload))
        ));
    }
}
