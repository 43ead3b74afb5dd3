use crate::common::address::{Long, Short};
use crate::drivers::bridge::BridgeClient;
use crate::drivers::command_utils::send16;
use crate::drivers::driver::DaliSendResult;
use crate::drivers::send_flags::NO_FLAG;
use crate::gear::cmd_defs as cmd;

/// Highest random address
pub const LONG_MAX: Long = 0xffffff;

/// Set the search address, only sending the bytes that differ from `current`
pub async fn set_search_addr_changed(
    client: &mut BridgeClient,
    addr: Long,
    current: &mut Option<Long>,
) -> Result<(), DaliSendResult> {
    let diff = current.map(|c| addr ^ c).unwrap_or(LONG_MAX);
    // Issue all frames before waiting for any of them
    let mut pending = Vec::with_capacity(3);
    if (diff & 0xff0000) != 0 {
        pending.push(send16::cmd(client, cmd::SEARCHADDRH((addr >> 16) as u8), NO_FLAG));
    }
    if (diff & 0x00ff00) != 0 {
        pending.push(send16::cmd(client, cmd::SEARCHADDRM((addr >> 8) as u8), NO_FLAG));
    }
    if (diff & 0x0000ff) != 0 {
        pending.push(send16::cmd(client, cmd::SEARCHADDRL(addr as u8), NO_FLAG));
    }
    // Unknown until all three are confirmed
    *current = None;
    for res in pending {
        res.await.check_send()?;
    }
    *current = Some(addr);
    Ok(())
}

pub async fn set_search_addr(client: &mut BridgeClient, addr: Long) -> Result<(), DaliSendResult> {
    set_search_addr_changed(client, addr, &mut None).await
}

/// Read the random address of a device
pub async fn query_random_address(
    client: &mut BridgeClient,
    addr: Short,
) -> Result<Long, DaliSendResult> {
    let h = send16::query(client, cmd::QUERY_RANDOM_ADDRESS_H(addr), NO_FLAG);
    let m = send16::query(client, cmd::QUERY_RANDOM_ADDRESS_M(addr), NO_FLAG);
    let l = send16::query(client, cmd::QUERY_RANDOM_ADDRESS_L(addr), NO_FLAG);
    let h = h.await.check_answer()?;
    let m = m.await.check_answer()?;
    let l = l.await.check_answer()?;
    Ok(((h as Long) << 16) | ((m as Long) << 8) | (l as Long))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drivers::bridge::client::ClientOptions;
    use crate::drivers::bridge::frame::opcode;
    use crate::drivers::simulator::bridge::{SimBus, SimTransport};
    use crate::drivers::simulator::gear::SimGear;

    #[tokio::test]
    async fn search_address_bytes() {
        let bus = SimBus::new(vec![SimGear::new(0x123456).with_short(2)]);
        let mut client = BridgeClient::new(
            Box::new(SimTransport::new(bus.clone())),
            ClientOptions::default(),
        );
        let mut current = None;
        set_search_addr_changed(&mut client, 0x123456, &mut current)
            .await
            .unwrap();
        set_search_addr_changed(&mut client, 0x123478, &mut current)
            .await
            .unwrap();
        assert_eq!(current, Some(0x123478));
        assert_eq!(
            bus.lock().unwrap().log,
            vec![
                (opcode::SEND, 0xb1, 0x12),
                (opcode::SEND, 0xb3, 0x34),
                (opcode::SEND, 0xb5, 0x56),
                (opcode::SEND, 0xb5, 0x78),
            ]
        );
        assert_eq!(
            query_random_address(&mut client, Short::new(2)).await.unwrap(),
            0x123456
        );
        assert!(query_random_address(&mut client, Short::new(3))
            .await
            .unwrap_err()
            .is_timeout());
    }
}
