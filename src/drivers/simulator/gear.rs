use crate::common::address::Long;
use crate::common::cmd_defs::{MASK, YES};
use crate::gear::cmd_defs::opcode;
use rand::Rng;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InitialisationState {
    Enabled,
    Disabled,
    Withdrawn,
}

/// Simulated control gear. Implements addressing, DTRs and memory banks.
#[derive(Debug, Clone)]
pub struct SimGear {
    /// 0..=63 or MASK
    pub short_address: u8,
    pub random_address: Long,
    /// Keep `random_address` on RANDOMISE
    pub fixed_random: bool,
    pub search_address: Long,
    pub initialisation_state: InitialisationState,
    pub dtr0: u8,
    pub dtr1: u8,
    pub dtr2: u8,
    /// Answer to QUERY VERSION NUMBER
    pub version: u8,
    /// Memory banks, byte 0 of each is the last accessible offset
    pub banks: Vec<Vec<u8>>,
    /// Memory locations (bank, offset) that never answer
    pub silent_cells: Vec<(u8, u8)>,
    /// Number of upcoming DTR0 reads that return a wrong value
    pub corrupt_dtr_reads: u32,
    /// Number of upcoming bank 0 reads that return a wrong value at offset 0x0b
    pub corrupt_bank0_reads: u32,
}

impl SimGear {
    pub fn new(random_address: Long) -> SimGear {
        SimGear {
            short_address: MASK,
            random_address,
            fixed_random: true,
            search_address: 0xffffff,
            initialisation_state: InitialisationState::Disabled,
            dtr0: 0,
            dtr1: 0,
            dtr2: 0,
            version: 0x08,
            banks: Vec::new(),
            silent_cells: Vec::new(),
            corrupt_dtr_reads: 0,
            corrupt_bank0_reads: 0,
        }
    }

    pub fn with_short(mut self, short: u8) -> SimGear {
        self.short_address = short;
        self
    }

    fn addressed(&self, addr: u8) -> bool {
        match addr >> 1 {
            a @ 0x00..=0x3f => a == self.short_address,
            0x7f => true,
            _ => false,
        }
    }

    fn read_memory(&mut self) -> Option<u8> {
        let offset = self.dtr0;
        if self.dtr0 < 0xff {
            self.dtr0 += 1;
        }
        if self.silent_cells.contains(&(self.dtr1, offset)) {
            return None;
        }
        let bank = self.banks.get(self.dtr1 as usize)?;
        if offset > bank[0] || offset as usize >= bank.len() {
            return None;
        }
        let mut value = bank[offset as usize];
        if self.dtr1 == 0 && offset == 0x0b && self.corrupt_bank0_reads > 0 {
            // Consecutive corrupt reads differ from each other
            value ^= 1 << (self.corrupt_bank0_reads % 8);
            self.corrupt_bank0_reads -= 1;
        }
        Some(value)
    }

    fn device_cmd(&mut self, cmd: u8) -> Option<u8> {
        match cmd {
            opcode::QUERY_CONTROL_GEAR_PRESENT => Some(YES),
            opcode::QUERY_MISSING_SHORT_ADDRESS => {
                if self.short_address == MASK {
                    Some(YES)
                } else {
                    None
                }
            }
            opcode::QUERY_VERSION_NUMBER => Some(self.version),
            opcode::QUERY_CONTENT_DTR0 => {
                if self.corrupt_dtr_reads > 0 {
                    self.corrupt_dtr_reads -= 1;
                    Some(!self.dtr0)
                } else {
                    Some(self.dtr0)
                }
            }
            opcode::QUERY_CONTENT_DTR1 => Some(self.dtr1),
            opcode::QUERY_CONTENT_DTR2 => Some(self.dtr2),
            opcode::QUERY_RANDOM_ADDRESS_H => Some((self.random_address >> 16) as u8),
            opcode::QUERY_RANDOM_ADDRESS_M => Some((self.random_address >> 8) as u8),
            opcode::QUERY_RANDOM_ADDRESS_L => Some(self.random_address as u8),
            opcode::READ_MEMORY_LOCATION => self.read_memory(),
            _ => None,
        }
    }

    fn special_cmd(&mut self, cmd: u8, data: u8, twice: bool) -> Option<u8> {
        let active = self.initialisation_state != InitialisationState::Disabled;
        let selected = self.initialisation_state == InitialisationState::Enabled
            && self.search_address == self.random_address;
        match cmd {
            opcode::TERMINATE => {
                self.initialisation_state = InitialisationState::Disabled;
            }
            opcode::INITIALISE if twice => {
                if ((data & 0x81) == 0x01 && (data >> 1) == self.short_address)
                    || (data == MASK && self.short_address == MASK)
                    || data == 0x00
                {
                    self.initialisation_state = InitialisationState::Enabled;
                }
            }
            opcode::RANDOMISE if twice => {
                if active && !self.fixed_random {
                    self.random_address = rand::thread_rng().gen_range(0..=0xffffff);
                }
            }
            opcode::COMPARE => {
                if self.initialisation_state == InitialisationState::Enabled
                    && self.random_address <= self.search_address
                {
                    return Some(YES);
                }
            }
            opcode::WITHDRAW => {
                if selected {
                    self.initialisation_state = InitialisationState::Withdrawn;
                }
            }
            opcode::SEARCHADDRH if active => {
                self.search_address = (self.search_address & 0x00ffff) | ((data as u32) << 16);
            }
            opcode::SEARCHADDRM if active => {
                self.search_address = (self.search_address & 0xff00ff) | ((data as u32) << 8);
            }
            opcode::SEARCHADDRL if active => {
                self.search_address = (self.search_address & 0xffff00) | (data as u32);
            }
            opcode::PROGRAM_SHORT_ADDRESS => {
                if selected {
                    if (data & 0x81) == 0x01 {
                        self.short_address = data >> 1;
                    } else if data == MASK {
                        self.short_address = MASK;
                    }
                }
            }
            opcode::VERIFY_SHORT_ADDRESS => {
                if active && (data >> 1) == self.short_address {
                    return Some(YES);
                }
            }
            opcode::QUERY_SHORT_ADDRESS => {
                if selected {
                    return Some(if self.short_address == MASK {
                        MASK
                    } else {
                        (self.short_address << 1) | 0x01
                    });
                }
            }
            opcode::DTR0 => self.dtr0 = data,
            opcode::DTR1 => self.dtr1 = data,
            opcode::DTR2 => self.dtr2 = data,
            _ => {}
        }
        None
    }

    /// Handle a 16 bit forward frame, returning the backward frame if any
    pub fn forward16(&mut self, frame: [u8; 2], twice: bool) -> Option<u8> {
        match frame[0] >> 1 {
            0x00..=0x3f | 0x7f => {
                if frame[0] & 1 == 1 && self.addressed(frame[0]) {
                    self.device_cmd(frame[1])
                } else {
                    None
                }
            }
            0x40..=0x4f => None,
            _ => self.special_cmd(frame[0], frame[1], twice),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::address::Short;
    use crate::gear::cmd_defs as cmd;

    #[test]
    fn addressing_mode() {
        let mut gear = SimGear::new(0x123456);
        assert_eq!(gear.forward16(cmd::INITIALISE_ALL().0, false), None);
        assert_eq!(gear.initialisation_state, InitialisationState::Disabled);
        gear.forward16(cmd::INITIALISE_ALL().0, true);
        assert_eq!(gear.initialisation_state, InitialisationState::Enabled);

        gear.forward16(cmd::SEARCHADDRH(0x12).0, false);
        gear.forward16(cmd::SEARCHADDRM(0x34).0, false);
        gear.forward16(cmd::SEARCHADDRL(0x55).0, false);
        assert_eq!(gear.forward16(cmd::COMPARE().0, false), None);
        gear.forward16(cmd::SEARCHADDRL(0x56).0, false);
        assert_eq!(gear.forward16(cmd::COMPARE().0, false), Some(YES));
        assert_eq!(gear.forward16(cmd::QUERY_SHORT_ADDRESS().0, false), Some(MASK));
        gear.forward16(cmd::PROGRAM_SHORT_ADDRESS(Short::new(4)).0, false);
        assert_eq!(gear.forward16(cmd::QUERY_SHORT_ADDRESS().0, false), Some(0x09));
        gear.forward16(cmd::WITHDRAW().0, false);
        assert_eq!(gear.forward16(cmd::COMPARE().0, false), None);
        assert_eq!(
            gear.forward16(cmd::QUERY_CONTROL_GEAR_PRESENT(Short::new(4)).0, false),
            Some(YES)
        );
    }

    #[test]
    fn memory_read_advances() {
        let mut gear = SimGear::new(1).with_short(0);
        gear.banks.push(vec![0x03, 0x00, 0x00, 0x42]);
        gear.forward16(cmd::DTR1(0).0, false);
        gear.forward16(cmd::DTR0(2).0, false);
        let read = cmd::READ_MEMORY_LOCATION(Short::new(0)).0;
        assert_eq!(gear.forward16(read, false), Some(0x00));
        assert_eq!(gear.forward16(read, false), Some(0x42));
        assert_eq!(gear.forward16(read, false), None);
        assert_eq!(gear.dtr0, 5);
    }
}
