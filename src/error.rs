use crate::common::address::{AddressError, Long};
use crate::drivers::driver::DaliSendResult;
use crate::utils::memory_banks::MemoryError;
use std::fmt;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug)]
pub enum Error {
    /// Another bus procedure is already running
    Busy,
    Send(DaliSendResult),
    /// Data read from a device is corrupt or fails validation
    BadData(String),
    NoValidAddress,
    /// More than one device answered on the same short address
    AddressCollisions,
    /// There are devices without a short address
    AddressesMissing,
    /// The device never returned the written data
    DataMissing,
    /// The device returned the written data only some of the time
    DataUnreliable,
    /// The random address search failed after all restarts
    DeviceSearch,
    /// Programming a short address to the device with this random address failed
    AddressAssignment(Long),
    Memory(MemoryError),
    Config(String),
    /// The procedure task ended without a result
    Aborted,
}

impl Error {
    /// The caller should stop and check the installation
    pub fn is_severe(&self) -> bool {
        match self {
            Error::Send(r) => r.is_severe(),
            _ => false,
        }
    }

    /// The quick scan can't be trusted, run a full discovery
    pub fn needs_full_scan(&self) -> bool {
        matches!(self, Error::AddressCollisions | Error::AddressesMissing)
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Busy => write!(f, "Bus busy with another procedure"),
            Error::Send(res) => res.fmt(f),
            Error::BadData(what) => write!(f, "Bad data: {}", what),
            Error::NoValidAddress => write!(f, "No valid address"),
            Error::AddressCollisions => write!(f, "Short address collisions detected"),
            Error::AddressesMissing => write!(f, "Devices without short address detected"),
            Error::DataMissing => write!(f, "No data returned"),
            Error::DataUnreliable => write!(f, "Data transfer unreliable"),
            Error::DeviceSearch => write!(f, "Device search failed"),
            Error::AddressAssignment(long) => {
                write!(f, "Failed to set short address for 0x{:06x}", long)
            }
            Error::Memory(e) => e.fmt(f),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Aborted => write!(f, "Procedure aborted"),
        }
    }
}

impl From<DaliSendResult> for Error {
    fn from(result: DaliSendResult) -> Error {
        Error::Send(result)
    }
}

impl From<MemoryError> for Error {
    fn from(e: MemoryError) -> Error {
        Error::Memory(e)
    }
}

impl From<AddressError> for Error {
    fn from(_: AddressError) -> Error {
        Error::NoValidAddress
    }
}
