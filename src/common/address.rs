use super::cmd_defs::{AddressByte, MASK};
use core::ops::RangeInclusive;
use core::str::FromStr;

/// Value used for display, normally 1 based
pub trait DisplayValue {
    fn display_value(&self) -> u8;
    fn from_display_value<A>(value: A) -> Result<Self, AddressError>
    where
        A: TryInto<u8>,
        Self: Sized;
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum AddressError {
    NotShort,
    NotGroup,
    InvalidAddress,
    NotTransmittable,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        match self {
            AddressError::NotShort => write!(fmt, "Not a short address"),
            AddressError::NotGroup => write!(fmt, "Not a group address"),
            AddressError::InvalidAddress => write!(fmt, "Invalid address"),
            AddressError::NotTransmittable => {
                write!(fmt, "Address can't be used as a bus address")
            }
        }
    }
}

impl std::error::Error for AddressError {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Short(u8);

impl Short {
    const DISPLAY_RANGE: RangeInclusive<u8> = 1..=64;
    pub const MAX: u8 = 63;

    pub fn new(a: u8) -> Short {
        assert!(a <= Self::MAX);
        Short(a)
    }

    pub fn try_new(a: u8) -> Result<Short, AddressError> {
        if a <= Self::MAX {
            Ok(Short(a))
        } else {
            Err(AddressError::NotShort)
        }
    }

    /// Address 0..63
    pub fn value(&self) -> u8 {
        self.0
    }

    /// All 64 short addresses in ascending order
    pub fn all() -> impl DoubleEndedIterator<Item = Short> {
        (0..=Self::MAX).map(Short)
    }

    /// Decode the answer to QUERY SHORT ADDRESS. 0xff means no address.
    pub fn from_answer(answer: u8) -> Result<Option<Short>, AddressError> {
        if answer == MASK {
            Ok(None)
        } else if answer & 0x81 == 0x01 {
            Ok(Some(Short(answer >> 1)))
        } else {
            Err(AddressError::InvalidAddress)
        }
    }
}

impl From<Short> for AddressByte {
    fn from(short: Short) -> Self {
        AddressByte((short.0 << 1) | 1)
    }
}

impl From<Option<Short>> for AddressByte {
    fn from(short_or_mask: Option<Short>) -> AddressByte {
        if let Some(addr) = short_or_mask {
            AddressByte::from(addr)
        } else {
            AddressByte(MASK)
        }
    }
}

impl DisplayValue for Short {
    fn display_value(&self) -> u8 {
        self.0 + Self::DISPLAY_RANGE.start()
    }
    fn from_display_value<A>(a: A) -> Result<Short, AddressError>
    where
        A: TryInto<u8>,
    {
        let Ok(a) = a.try_into() else {
            return Err(AddressError::InvalidAddress);
        };
        if !Self::DISPLAY_RANGE.contains(&a) {
            return Err(AddressError::InvalidAddress);
        }
        Ok(Short(a - Self::DISPLAY_RANGE.start()))
    }
}

impl std::convert::TryFrom<BusAddress> for Short {
    type Error = AddressError;
    fn try_from(addr: BusAddress) -> Result<Short, Self::Error> {
        if let BusAddress::Short(s) = addr {
            Ok(s)
        } else {
            Err(AddressError::NotShort)
        }
    }
}

impl std::fmt::Display for Short {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        self.display_value().fmt(fmt)
    }
}

impl FromStr for Short {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u8::from_str(s).map_or(Err(AddressError::InvalidAddress), |a| {
            Self::from_display_value(a)
        })
    }
}

/// 24 bit random address
pub type Long = u32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Group(u8);

impl Group {
    pub const MAX: u8 = 15;

    pub fn new(a: u8) -> Group {
        assert!(a <= Self::MAX);
        Group(a)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl From<Group> for AddressByte {
    fn from(group: Group) -> AddressByte {
        AddressByte((group.0 << 1) | 0x81)
    }
}

impl std::convert::TryFrom<BusAddress> for Group {
    type Error = AddressError;
    fn try_from(addr: BusAddress) -> Result<Group, Self::Error> {
        if let BusAddress::Group(g) = addr {
            Ok(g)
        } else {
            Err(AddressError::NotGroup)
        }
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        self.0.fmt(fmt)
    }
}

/// Abstract bus address.
///
/// `Scene` only selects a command variant (GO TO SCENE etc.) and is never
/// put on the bus as an address. `NoAddress` is the "deleted short address"
/// marker used when programming or reading back short addresses. It only
/// appears as a data byte, so it has no address byte either.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusAddress {
    Short(Short),
    Group(Group),
    Broadcast,
    Scene(u8),
    NoAddress,
}

impl BusAddress {
    /// Wire address byte. `command` sets the selector bit; when clear the
    /// frame is a direct arc power command.
    pub fn encode(&self, command: bool) -> Result<u8, AddressError> {
        let selector = if command { 1 } else { 0 };
        match *self {
            BusAddress::Short(s) => Ok((s.0 << 1) | selector),
            BusAddress::Group(g) => Ok(0x80 | (g.0 << 1) | selector),
            BusAddress::Broadcast => Ok(0xfe | selector),
            BusAddress::Scene(_) | BusAddress::NoAddress => Err(AddressError::NotTransmittable),
        }
    }

    /// Decode the address byte of a forward frame. The selector bit is ignored.
    pub fn decode(bus: u8) -> Result<BusAddress, AddressError> {
        match bus >> 1 {
            a @ 0x00..=0x3f => Ok(BusAddress::Short(Short(a))),
            a @ 0x40..=0x4f => Ok(BusAddress::Group(Group(a & 0x0f))),
            0x7f => Ok(BusAddress::Broadcast),
            _ => Err(AddressError::InvalidAddress),
        }
    }

    /// Decode a programmed short address value, where 0xff is "no address"
    pub fn decode_short_answer(answer: u8) -> Result<BusAddress, AddressError> {
        Short::from_answer(answer).map(|s| match s {
            Some(s) => BusAddress::Short(s),
            None => BusAddress::NoAddress,
        })
    }

    /// True if the address byte selects a command rather than a power level
    pub fn is_command(bus: u8) -> bool {
        bus & 1 == 1
    }
}

impl std::convert::From<Short> for BusAddress {
    fn from(a: Short) -> Self {
        BusAddress::Short(a)
    }
}

impl std::convert::From<Group> for BusAddress {
    fn from(a: Group) -> Self {
        BusAddress::Group(a)
    }
}

impl std::cmp::PartialEq<Short> for BusAddress {
    fn eq(&self, other: &Short) -> bool {
        match self {
            BusAddress::Short(a) => a == other,
            _ => false,
        }
    }
}

impl std::convert::TryFrom<BusAddress> for AddressByte {
    type Error = AddressError;
    fn try_from(addr: BusAddress) -> Result<AddressByte, AddressError> {
        addr.encode(true).map(AddressByte)
    }
}

impl From<Broadcast> for AddressByte {
    fn from(_: Broadcast) -> AddressByte {
        AddressByte(0xff)
    }
}

/// Marker for broadcast commands
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Broadcast;

impl std::fmt::Display for BusAddress {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BusAddress::Short(s) => write!(fmt, "short {}", s),
            BusAddress::Group(g) => write!(fmt, "group {}", g),
            BusAddress::Broadcast => write!(fmt, "broadcast"),
            BusAddress::Scene(s) => write!(fmt, "scene {}", s),
            BusAddress::NoAddress => write!(fmt, "no address"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn short_round_trip() {
        for a in Short::all() {
            let addr = BusAddress::Short(a);
            let byte = addr.encode(true).unwrap();
            assert_eq!(byte, (a.value() << 1) | 1);
            assert_eq!(BusAddress::decode(byte).unwrap(), addr);
            assert_eq!(BusAddress::decode(addr.encode(false).unwrap()).unwrap(), addr);
        }
        let b = BusAddress::decode(0x3f << 1).unwrap();
        assert_eq!(Short::try_from(b).unwrap(), Short::new(63));
    }

    #[test]
    fn group_round_trip() {
        for g in 0..=Group::MAX {
            let addr = BusAddress::Group(Group::new(g));
            let byte = addr.encode(true).unwrap();
            assert_eq!(byte & 0xe1, 0x81);
            assert_eq!(BusAddress::decode(byte).unwrap(), addr);
        }
        assert_eq!(
            BusAddress::decode(0x9e).unwrap(),
            BusAddress::Group(Group::new(15))
        );
    }

    #[test]
    fn fixed_points() {
        let b = BusAddress::Broadcast.encode(true).unwrap();
        assert_eq!(b, 0xff);
        assert_eq!(BusAddress::decode(b).unwrap(), BusAddress::Broadcast);
        assert_eq!(BusAddress::Broadcast.encode(false).unwrap(), 0xfe);

        for command in [true, false] {
            assert_eq!(
                BusAddress::NoAddress.encode(command).map(BusAddress::decode),
                Err(AddressError::NotTransmittable)
            );
        }
        assert_eq!(
            BusAddress::decode_short_answer(MASK).unwrap(),
            BusAddress::NoAddress
        );
    }

    #[test]
    fn invalid_addresses() {
        assert_eq!(
            BusAddress::Scene(3).encode(true),
            Err(AddressError::NotTransmittable)
        );
        assert_eq!(BusAddress::decode(0xa1), Err(AddressError::InvalidAddress));
        assert_eq!(BusAddress::decode(0xfc), Err(AddressError::InvalidAddress));
        assert_eq!(Short::from_answer(0x80), Err(AddressError::InvalidAddress));
    }

    #[test]
    fn display_values() {
        assert_eq!(Short::from_str("1").unwrap(), Short::new(0));
        assert_eq!(Short::from_str("64").unwrap(), Short::new(63));
        assert!(Short::from_str("65").is_err());
        assert!(Short::from_str("0").is_err());
        assert_eq!(Short::new(9).to_string(), "10");
    }
}
