use crate::common::address::{Long, Short};
use crate::config::BridgeConfig;
use crate::drivers::bridge::frame::BridgeCommand;
use crate::drivers::bridge::BridgeClient;
use crate::drivers::bridge::client::BridgeStats;
use crate::drivers::driver::{BridgeReply, DaliBusEvent, TransportError};
use crate::utils::bus_scan::{self, ScanResult};
use crate::utils::device_info::{self, DeviceIdentity, DeviceInfoOptions};
use crate::utils::discover::{self, DiscoveryResult};
use crate::utils::dyn_future::{boxed, DynFuture, DynFutureStatic};
use crate::utils::long_address;
use crate::utils::memory_banks::{self, MemoryCell};
use crate::utils::reliability;
use crate::Error;
use log::debug;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

type SyncClient = Arc<Mutex<BridgeClient>>;

/// A bus where one procedure at a time may run.
///
/// Every operation starts at once in its own task and returns a future for
/// the result. Starting an operation while another one is running fails with
/// `Error::Busy`.
#[derive(Clone)]
pub struct DaliBus {
    client: SyncClient,
    // Used without taking the lock
    monitor: BridgeClient,
    config: BridgeConfig,
}

impl DaliBus {
    pub fn new(client: BridgeClient, config: BridgeConfig) -> DaliBus {
        DaliBus {
            monitor: client.clone(),
            client: Arc::new(Mutex::new(client)),
            config,
        }
    }

    pub fn open(config: BridgeConfig) -> Result<DaliBus, Error> {
        let client = BridgeClient::open(&config)?;
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn run<T, F>(&self, procedure: F) -> DynFutureStatic<Result<T, Error>>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut BridgeClient) -> DynFuture<'a, Result<T, Error>> + Send + 'static,
    {
        let mut guard = match self.client.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Bus busy, rejecting procedure");
                return Box::pin(std::future::ready(Err(Error::Busy)));
            }
        };
        let handle = tokio::spawn(async move { procedure(&mut *guard).await });
        Box::pin(async move { handle.await.unwrap_or_else(|_| Err(Error::Aborted)) })
    }

    pub fn is_busy(&self) -> bool {
        self.client.try_lock().is_err()
    }

    pub fn reset(&self) -> DynFutureStatic<Result<(), Error>> {
        self.run(|c| boxed(c.reset()))
    }

    /// Quick scan of all short addresses
    pub fn bus_scan(&self) -> DynFutureStatic<Result<ScanResult, Error>> {
        self.run(|c| boxed(bus_scan::bus_scan(c)))
    }

    /// Find all devices and resolve address problems
    pub fn full_scan(&self, force: bool) -> DynFutureStatic<Result<DiscoveryResult, Error>> {
        self.run(move |c| boxed(discover::full_scan(c, force)))
    }

    pub fn test_reliability(&self, addr: Short, cycles: u32) -> DynFutureStatic<Result<(), Error>> {
        self.run(move |c| boxed(reliability::test_reliability(c, addr, cycles)))
    }

    pub fn read_memory(
        &self,
        addr: Short,
        bank: u8,
        start: u8,
        length: usize,
    ) -> DynFutureStatic<Result<Vec<MemoryCell>, Error>> {
        self.run(move |c| boxed(memory_banks::read_memory(c, addr, bank, start, length)))
    }

    pub fn read_bank(&self, addr: Short, bank: u8) -> DynFutureStatic<Result<Vec<MemoryCell>, Error>> {
        self.run(move |c| boxed(memory_banks::read_bank(c, addr, bank)))
    }

    pub fn read_device_info(&self, addr: Short) -> DynFutureStatic<Result<DeviceIdentity, Error>> {
        let options = DeviceInfoOptions {
            dali2_scan_lock: self.config.dali2_scan_lock,
            legacy_checksum_compat: self.config.legacy_checksum_compat,
            gtin_denylist: self.config.gtin_denylist.clone(),
        };
        self.run(move |c| boxed(device_info::read_device_info(c, addr, options)))
    }

    pub fn query_random_address(&self, addr: Short) -> DynFutureStatic<Result<Long, Error>> {
        self.run(move |c| {
            boxed(async move {
                long_address::query_random_address(c, addr)
                    .await
                    .map_err(Error::from)
            })
        })
    }

    /// Set or clear (`None`) the short address of the device with random address `random`
    pub fn program_short_address(
        &self,
        random: Long,
        short: Option<Short>,
    ) -> DynFutureStatic<Result<(), Error>> {
        self.run(move |c| boxed(discover::program_short_address(c, random, short)))
    }

    /// Send a single bridge command
    pub fn send_raw(&self, command: BridgeCommand, query: bool) -> DynFutureStatic<Result<BridgeReply, Error>> {
        self.run(move |c| boxed(async move { Ok(c.send_raw(command, query).await) }))
    }

    /// Receive frames sent by other masters
    pub fn subscribe_events(&self) -> Result<mpsc::Receiver<DaliBusEvent>, TransportError> {
        self.monitor.subscribe_events()
    }

    pub fn stats(&self) -> BridgeStats {
        self.monitor.stats()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drivers::bridge::client::ClientOptions;
    use crate::drivers::bridge::frame::opcode;
    use crate::drivers::driver::DaliSendResult;
    use crate::drivers::simulator::bridge::{SimBus, SimTransport, SIM_BRIDGE_VERSION};
    use crate::drivers::simulator::gear::SimGear;

    fn sim_bus(gear: Vec<SimGear>) -> DaliBus {
        let client = BridgeClient::new(
            Box::new(SimTransport::new(SimBus::new(gear))),
            ClientOptions::default(),
        );
        DaliBus::new(client, BridgeConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn one_procedure_at_a_time() {
        let bus = sim_bus(vec![SimGear::new(0x123456).with_short(1), SimGear::new(0x10)]);
        let scan = bus.full_scan(false);
        assert!(bus.is_busy());
        assert!(matches!(bus.bus_scan().await, Err(Error::Busy)));
        assert!(matches!(
            bus.send_raw(BridgeCommand::short(opcode::VERSION), true).await,
            Err(Error::Busy)
        ));
        let res = scan.await.unwrap();
        assert!(res.error.is_none());
        assert_eq!(res.devices.len(), 2);
        assert!(!bus.is_busy());

        assert_eq!(
            bus.query_random_address(Short::new(1)).await.unwrap(),
            0x123456
        );
        let reply = bus
            .send_raw(BridgeCommand::short(opcode::VERSION), true)
            .await
            .unwrap();
        assert!(matches!(reply.result, DaliSendResult::Answer(SIM_BRIDGE_VERSION)));
        assert_eq!(bus.stats().outstanding, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn procedures_through_bus() {
        let mut gear = SimGear::new(0x10).with_short(5);
        gear.banks.push(vec![0x02, 0x00, 0x00]);
        let bus = sim_bus(vec![gear]);
        bus.reset().await.unwrap();
        bus.test_reliability(Short::new(5), 4).await.unwrap();
        let cells = bus.read_bank(Short::new(5), 0).await.unwrap();
        assert_eq!(cells.len(), 3);
        assert!(matches!(
            bus.read_device_info(Short::new(5)).await,
            Err(Error::Memory(_))
        ));
        bus.program_short_address(0x10, Some(Short::new(6)))
            .await
            .unwrap();
        let res = bus.bus_scan().await.unwrap();
        assert_eq!(res.reliable, vec![Short::new(6)]);
    }
}
