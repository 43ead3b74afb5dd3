use crate::common::address::Short;
use crate::drivers::bridge::BridgeClient;
use crate::drivers::command_utils::send16;
use crate::drivers::driver::DaliSendResult;
use crate::drivers::send_flags::NO_FLAG;
use crate::gear::cmd_defs as cmd;
use crate::Error;
use log::{debug, warn};

/// Added to the test pattern every cycle. Covers all byte values in 256 cycles.
const PATTERN_STEP: u8 = 0x55;

/// Write a changing value to DTR0 and read it back `cycles` times.
///
/// Returns `DataMissing` if no cycle succeeded and `DataUnreliable` if only
/// some did. Bus overload aborts the test at once.
pub async fn test_reliability(
    client: &mut BridgeClient,
    addr: Short,
    cycles: u32,
) -> Result<(), Error> {
    let _proc = client.begin_procedure();
    let mut value = 0u8;
    let mut failures = 0;
    for _ in 0..cycles {
        let res = send16::with_dtr0(client, value, cmd::QUERY_CONTENT_DTR0(addr), NO_FLAG).await;
        match res {
            DaliSendResult::Answer(r) if r == value => {}
            DaliSendResult::Answer(r) => {
                debug!("{}: wrote 0x{:02x}, read 0x{:02x}", addr, value, r);
                failures += 1;
            }
            DaliSendResult::Overload => return Err(Error::Send(DaliSendResult::Overload)),
            e => {
                debug!("{}: DTR0 round trip failed: {}", addr, e);
                failures += 1;
            }
        }
        value = value.wrapping_add(PATTERN_STEP);
    }
    if failures == 0 {
        Ok(())
    } else if failures == cycles {
        Err(Error::DataMissing)
    } else {
        warn!("{}: {} of {} DTR0 round trips failed", addr, failures, cycles);
        Err(Error::DataUnreliable)
    }
}
