use crate::common::address::Short;
use core::ops::{Add, AddAssign, Sub};

/// Set of short addresses, one bit per address
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct AddressSet(u64);

impl AddressSet {
    pub fn new() -> AddressSet {
        AddressSet(0)
    }

    /// All 64 short addresses
    pub fn full() -> AddressSet {
        AddressSet(u64::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, addr: Short) -> bool {
        self.0 & bit(addr) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Highest address not in the set
    pub fn highest_free(&self) -> Option<Short> {
        let free = !self.0;
        if free == 0 {
            None
        } else {
            Some(Short::new(63 - free.leading_zeros() as u8))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Short> + '_ {
        Short::all().filter(move |a| self.contains(*a))
    }
}

fn bit(addr: Short) -> u64 {
    1u64 << addr.value()
}

impl FromIterator<Short> for AddressSet {
    fn from_iter<I: IntoIterator<Item = Short>>(iter: I) -> AddressSet {
        AddressSet(iter.into_iter().fold(0, |s, a| s | bit(a)))
    }
}

impl Add<Short> for AddressSet {
    type Output = AddressSet;
    fn add(self, addr: Short) -> AddressSet {
        AddressSet(self.0 | bit(addr))
    }
}

impl AddAssign<Short> for AddressSet {
    fn add_assign(&mut self, addr: Short) {
        self.0 |= bit(addr);
    }
}

impl Add<&AddressSet> for AddressSet {
    type Output = AddressSet;
    fn add(self, other: &AddressSet) -> AddressSet {
        AddressSet(self.0 | other.0)
    }
}

impl Sub<Short> for AddressSet {
    type Output = AddressSet;
    fn sub(self, addr: Short) -> AddressSet {
        AddressSet(self.0 & !bit(addr))
    }
}
