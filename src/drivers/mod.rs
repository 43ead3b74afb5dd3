pub mod driver;

pub mod command_utils;
pub mod send_flags;

pub mod bridge {
    pub mod client;
    pub mod engine;
    pub mod frame;
    pub mod transport;
    pub use client::BridgeClient;

    #[cfg(test)]
    mod test;
}

#[cfg(any(test, feature = "simulator"))]
pub mod simulator {
    pub mod bridge;
    pub mod gear;
}
