/// Address byte as sent in the first byte of a 16 bit forward frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressByte(pub u8);

/// "No value" / "not set" marker used for short addresses, scene levels etc.
pub const MASK: u8 = 0xff;

/// Answer byte for a positive reply to a yes/no query
pub const YES: u8 = 0xff;
