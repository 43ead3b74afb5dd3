use super::bridge::client::BridgeClient;
use super::driver::DaliSendResult;
use super::send_flags::Flags;
use crate::drivers::send_flags::{EXPECT_ANSWER, NO_FLAG, SEND_TWICE};
use crate::utils::dyn_future::DynFutureStatic;

pub mod send16 {
    use super::*;
    use crate::common::cmd_defs::AddressByte;
    use crate::gear::cmd_defs as cmd;
    use crate::gear::cmd_defs::{Command, DeviceTypeCommand};

    // Wait for the preceding frames, then the last one
    fn chain(
        pre: Vec<DynFutureStatic<DaliSendResult>>,
        last: DynFutureStatic<DaliSendResult>,
    ) -> DynFutureStatic<DaliSendResult> {
        Box::pin(async move {
            for f in pre {
                if let Err(e) = f.await.check_send() {
                    return e;
                }
            }
            last.await
        })
    }

    fn flags_for<const A: bool, const T: bool>(flags: Flags) -> Flags {
        let flags = flags | if A { EXPECT_ANSWER } else { NO_FLAG };
        flags | if T { SEND_TWICE } else { NO_FLAG }
    }

    /// Send DALI commands
    ///
    /// # Arguments
    /// * `cmd` - DALI command
    /// * `flags` - Options for transaction
    pub fn cmd<const T: bool>(
        client: &mut BridgeClient,
        cmd: Command<false, T>,
        flags: Flags,
    ) -> DynFutureStatic<DaliSendResult> {
        client.send16(cmd.0, flags | if T { SEND_TWICE } else { NO_FLAG })
    }

    /// Make DALI query
    ///
    /// # Arguments
    /// * `cmd` - DALI query
    /// * `flags` - Options for transaction
    pub fn query(
        client: &mut BridgeClient,
        cmd: Command<true, false>,
        flags: Flags,
    ) -> DynFutureStatic<DaliSendResult> {
        client.send16(cmd.0, flags | EXPECT_ANSWER)
    }

    /// Send DALI DAPC commands
    ///
    /// # Arguments
    /// * `addr` - Address of device(s)
    /// * `level` - Intensity level
    /// * `flags` - Options for transaction
    pub fn device_level<A>(
        client: &mut BridgeClient,
        addr: A,
        level: u8,
        flags: Flags,
    ) -> DynFutureStatic<DaliSendResult>
    where
        A: Into<AddressByte>,
    {
        client.send16(cmd::DAPC(addr, level).0, flags)
    }

    /// Set value of DTR0
    pub fn set_dtr0(client: &mut BridgeClient, dtr: u8, flags: Flags) -> DynFutureStatic<DaliSendResult> {
        client.send16(cmd::DTR0(dtr).0, flags)
    }

    /// Set value of DTR1
    pub fn set_dtr1(client: &mut BridgeClient, dtr: u8, flags: Flags) -> DynFutureStatic<DaliSendResult> {
        client.send16(cmd::DTR1(dtr).0, flags)
    }

    /// Set value of DTR2
    pub fn set_dtr2(client: &mut BridgeClient, dtr: u8, flags: Flags) -> DynFutureStatic<DaliSendResult> {
        client.send16(cmd::DTR2(dtr).0, flags)
    }

    /// Load DTR0 with `value` and send `cmd`
    pub fn with_dtr0<const A: bool, const T: bool>(
        client: &mut BridgeClient,
        value: u8,
        cmd: Command<A, T>,
        flags: Flags,
    ) -> DynFutureStatic<DaliSendResult> {
        let pre = vec![set_dtr0(client, value, NO_FLAG)];
        let last = client.send16(cmd.0, flags_for::<A, T>(flags));
        chain(pre, last)
    }

    /// Load DTR0 with the low and DTR1 with the high byte of `value`, then send `cmd`
    pub fn with_u16<const A: bool, const T: bool>(
        client: &mut BridgeClient,
        value: u16,
        cmd: Command<A, T>,
        flags: Flags,
    ) -> DynFutureStatic<DaliSendResult> {
        let [low, high] = value.to_le_bytes();
        let pre = vec![
            set_dtr0(client, low, NO_FLAG),
            set_dtr1(client, high, NO_FLAG),
        ];
        let last = client.send16(cmd.0, flags_for::<A, T>(flags));
        chain(pre, last)
    }

    /// Load DTR0, DTR1 and DTR2 in that order, then send `cmd`
    pub fn with_dtrs<const A: bool, const T: bool>(
        client: &mut BridgeClient,
        values: [u8; 3],
        cmd: Command<A, T>,
        flags: Flags,
    ) -> DynFutureStatic<DaliSendResult> {
        let pre = vec![
            set_dtr0(client, values[0], NO_FLAG),
            set_dtr1(client, values[1], NO_FLAG),
            set_dtr2(client, values[2], NO_FLAG),
        ];
        let last = client.send16(cmd.0, flags_for::<A, T>(flags));
        chain(pre, last)
    }

    /// Send an application extended command preceded by ENABLE DEVICE TYPE.
    /// A pending delay applies to the prefix frame.
    pub fn device_type<const A: bool, const T: bool>(
        client: &mut BridgeClient,
        cmd: DeviceTypeCommand<A, T>,
        flags: Flags,
    ) -> DynFutureStatic<DaliSendResult> {
        let pre = vec![client.send16(cmd::ENABLE_DEVICE_TYPE(cmd.device_type).0, NO_FLAG)];
        let last = client.send16(cmd.cmd.0, flags_for::<A, T>(flags));
        chain(pre, last)
    }
}
