pub mod error;
pub use error::Error;

pub mod cli;
pub mod config;

pub mod common {
    pub mod address;
    pub mod cmd_defs;
}

pub mod gear {
    pub mod cmd_defs;
}

pub mod drivers;

pub mod utils {
    pub mod address_set;
    pub mod bus_scan;
    pub mod device_info;
    pub mod discover;
    pub mod dyn_future;
    pub mod long_address;
    pub mod memory_banks;
    pub mod reliability;
}

pub mod bus;
pub use bus::DaliBus;
