use crate::common::cmd_defs::AddressByte;

/// 16 bit forward frame for control gear.
///
/// `ANSWER` is set for queries, `TWICE` for configuration commands that
/// must be repeated within 100 ms to be accepted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Command<const ANSWER: bool, const TWICE: bool>(pub [u8; 2]);

/// Application extended command. Must be preceded by ENABLE DEVICE TYPE.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceTypeCommand<const ANSWER: bool, const TWICE: bool> {
    pub device_type: u8,
    pub cmd: Command<ANSWER, TWICE>,
}

impl<const ANSWER: bool, const TWICE: bool> Command<ANSWER, TWICE> {
    pub const fn with_device_type(self, device_type: u8) -> DeviceTypeCommand<ANSWER, TWICE> {
        DeviceTypeCommand {
            device_type,
            cmd: self,
        }
    }
}

macro_rules! cmd_type {
    () => {Command<false,false>};
    (Answer) => {Command<true,false>};
    (Twice) => {Command<false,true>};
}

macro_rules! dev_cmd_def {
    ($sym: ident, $opcode: expr $(,$attr: ident)?) => {
        #[allow(non_snake_case)]
        #[inline(always)]
        pub fn $sym<A>(addr: A) -> cmd_type!($($attr)?)
        where
            A: Into<AddressByte>,
        {
            Command([addr.into().0, $opcode])
        }
    };
}

macro_rules! offset_cmd_def {
    ($sym: ident, $opcode: expr $(,$attr: ident)?) => {
        #[allow(non_snake_case)]
        #[inline(always)]
        pub fn $sym<A>(addr: A, offset: u8) -> cmd_type!($($attr)?)
        where
            A: Into<AddressByte>,
        {
            Command([addr.into().0, $opcode + (offset & 0x0f)])
        }
    };
}

macro_rules! special_cmd_def {
    ($sym: ident, $byte1: expr, $byte2: expr $(,$attr: ident)?) => {
        #[allow(non_snake_case)]
        #[inline(always)]
        pub const fn $sym() -> cmd_type!($($attr)?) {
            Command([$byte1, $byte2])
        }
    };
}

macro_rules! special_data_cmd_def {
    ($sym: ident, $byte1: expr $(,$attr: ident)?) => {
        #[allow(non_snake_case)]
        #[inline(always)]
        pub const fn $sym(data: u8) ->cmd_type!($($attr)?) {
            Command([$byte1, data])
        }
    };
}

#[allow(non_snake_case)]
#[inline(always)]
pub fn DAPC<A>(addr: A, level: u8) -> Command<false, false>
where
    A: Into<AddressByte>,
{
    Command([addr.into().0 & 0xfe, level])
}

dev_cmd_def!(OFF, 0x00);
dev_cmd_def!(UP, 0x01);
dev_cmd_def!(DOWN, 0x02);
dev_cmd_def!(STEP_UP, 0x03);
dev_cmd_def!(STEP_DOWN, 0x04);
dev_cmd_def!(RECALL_MAX_LEVEL, 0x05);
dev_cmd_def!(RECALL_MIN_LEVEL, 0x06);

offset_cmd_def!(GOTO_SCENE, 0x10);

dev_cmd_def!(RESET, 0x20, Twice);
dev_cmd_def!(STORE_ACTUAL_LEVEL_IN_DTR0, 0x21, Twice);

dev_cmd_def!(STORE_DTR_AS_MAX_LEVEL, 0x2a, Twice);
dev_cmd_def!(STORE_DTR_AS_MIN_LEVEL, 0x2b, Twice);
dev_cmd_def!(STORE_DTR_AS_SYSTEM_FAILURE_LEVEL, 0x2c, Twice);
dev_cmd_def!(STORE_DTR_AS_POWER_ON_LEVEL, 0x2d, Twice);
dev_cmd_def!(STORE_DTR_AS_FADE_TIME, 0x2e, Twice);
dev_cmd_def!(STORE_DTR_AS_FADE_RATE, 0x2f, Twice);

offset_cmd_def!(STORE_DTR_AS_SCENE, 0x40, Twice);
offset_cmd_def!(REMOVE_FROM_SCENE, 0x50, Twice);
offset_cmd_def!(ADD_TO_GROUP, 0x60, Twice);
offset_cmd_def!(REMOVE_FROM_GROUP, 0x70, Twice);

dev_cmd_def!(STORE_DTR_AS_SHORT_ADDRESS, 0x80, Twice);

dev_cmd_def!(QUERY_STATUS, 0x90, Answer);
dev_cmd_def!(QUERY_CONTROL_GEAR_PRESENT, 0x91, Answer);
dev_cmd_def!(QUERY_MISSING_SHORT_ADDRESS, 0x96, Answer);
dev_cmd_def!(QUERY_VERSION_NUMBER, 0x97, Answer);
dev_cmd_def!(QUERY_CONTENT_DTR0, 0x98, Answer);
dev_cmd_def!(QUERY_DEVICE_TYPE, 0x99, Answer);
dev_cmd_def!(QUERY_CONTENT_DTR1, 0x9c, Answer);
dev_cmd_def!(QUERY_CONTENT_DTR2, 0x9d, Answer);

dev_cmd_def!(QUERY_ACTUAL_LEVEL, 0xa0, Answer);
dev_cmd_def!(QUERY_MAX_LEVEL, 0xa1, Answer);
dev_cmd_def!(QUERY_MIN_LEVEL, 0xa2, Answer);

dev_cmd_def!(QUERY_GROUPS_0_7, 0xc0, Answer);
dev_cmd_def!(QUERY_GROUPS_8_15, 0xc1, Answer);
dev_cmd_def!(QUERY_RANDOM_ADDRESS_H, 0xc2, Answer);
dev_cmd_def!(QUERY_RANDOM_ADDRESS_M, 0xc3, Answer);
dev_cmd_def!(QUERY_RANDOM_ADDRESS_L, 0xc4, Answer);
dev_cmd_def!(READ_MEMORY_LOCATION, 0xc5, Answer);

dev_cmd_def!(QUERY_EXTENDED_VERSION_NUMBER, 0xff, Answer);

special_cmd_def!(TERMINATE, 0xa1, 0x00);

#[allow(non_snake_case)]
#[inline(always)]
pub fn INITIALISE_ADDR<A>(addr: A) -> Command<false, true>
where
    A: Into<AddressByte>,
{
    Command([0xa5, addr.into().0])
}

special_cmd_def!(INITIALISE_ALL, 0xa5, 0x00, Twice);
special_cmd_def!(INITIALISE_NO_ADDR, 0xa5, 0xff, Twice);
special_cmd_def!(RANDOMISE, 0xa7, 0x00, Twice);
special_cmd_def!(COMPARE, 0xa9, 0x00, Answer);
special_cmd_def!(WITHDRAW, 0xab, 0x00);
special_cmd_def!(PING, 0xad, 0x00);

special_data_cmd_def!(SEARCHADDRH, 0xb1);
special_data_cmd_def!(SEARCHADDRM, 0xb3);
special_data_cmd_def!(SEARCHADDRL, 0xb5);

#[allow(non_snake_case)]
#[inline(always)]
pub fn PROGRAM_SHORT_ADDRESS<A>(addr: A) -> Command<false, false>
where
    A: Into<AddressByte>,
{
    Command([0xb7, addr.into().0])
}

#[allow(non_snake_case)]
#[inline(always)]
pub fn VERIFY_SHORT_ADDRESS<A>(addr: A) -> Command<true, false>
where
    A: Into<AddressByte>,
{
    Command([0xb9, addr.into().0])
}

special_cmd_def!(QUERY_SHORT_ADDRESS, 0xbb, 0x00, Answer);
special_cmd_def!(PHYSICAL_SELECTION, 0xbd, 0x00);
special_data_cmd_def!(ENABLE_DEVICE_TYPE, 0xc1);

special_data_cmd_def!(DTR0, 0xa3);
special_data_cmd_def!(DTR1, 0xc3);
special_data_cmd_def!(DTR2, 0xc5);

/// Opcode bytes for matching received frames
pub mod opcode {
    pub const QUERY_CONTROL_GEAR_PRESENT: u8 = 0x91;
    pub const QUERY_MISSING_SHORT_ADDRESS: u8 = 0x96;
    pub const QUERY_VERSION_NUMBER: u8 = 0x97;
    pub const QUERY_CONTENT_DTR0: u8 = 0x98;
    pub const QUERY_CONTENT_DTR1: u8 = 0x9c;
    pub const QUERY_CONTENT_DTR2: u8 = 0x9d;
    pub const QUERY_RANDOM_ADDRESS_H: u8 = 0xc2;
    pub const QUERY_RANDOM_ADDRESS_M: u8 = 0xc3;
    pub const QUERY_RANDOM_ADDRESS_L: u8 = 0xc4;
    pub const READ_MEMORY_LOCATION: u8 = 0xc5;
    pub const QUERY_EXTENDED_VERSION_NUMBER: u8 = 0xff;

    pub const TERMINATE: u8 = 0xa1;
    pub const DTR0: u8 = 0xa3;
    pub const INITIALISE: u8 = 0xa5;
    pub const RANDOMISE: u8 = 0xa7;
    pub const COMPARE: u8 = 0xa9;
    pub const WITHDRAW: u8 = 0xab;
    pub const PING: u8 = 0xad;
    pub const SEARCHADDRH: u8 = 0xb1;
    pub const SEARCHADDRM: u8 = 0xb3;
    pub const SEARCHADDRL: u8 = 0xb5;
    pub const PROGRAM_SHORT_ADDRESS: u8 = 0xb7;
    pub const VERIFY_SHORT_ADDRESS: u8 = 0xb9;
    pub const QUERY_SHORT_ADDRESS: u8 = 0xbb;
    pub const ENABLE_DEVICE_TYPE: u8 = 0xc1;
    pub const DTR1: u8 = 0xc3;
    pub const DTR2: u8 = 0xc5;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::address::{Broadcast, Group, Short};

    #[test]
    fn frame_layout() {
        assert_eq!(QUERY_STATUS(Short::new(3)).0, [0x07, 0x90]);
        assert_eq!(GOTO_SCENE(Group::new(2), 5).0, [0x85, 0x15]);
        assert_eq!(DAPC(Broadcast, 0x80).0, [0xfe, 0x80]);
        assert_eq!(PROGRAM_SHORT_ADDRESS(Some(Short::new(10))).0, [0xb7, 0x15]);
        assert_eq!(PROGRAM_SHORT_ADDRESS(None::<Short>).0, [0xb7, 0xff]);
        let dt = QUERY_EXTENDED_VERSION_NUMBER(Short::new(0)).with_device_type(6);
        assert_eq!(dt.device_type, 6);
        assert_eq!(dt.cmd.0, [0x01, 0xff]);
    }
}
