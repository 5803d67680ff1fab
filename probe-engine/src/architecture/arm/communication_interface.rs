//! The Debug Port engine: version detection, register access with sticky
//! error recovery, SELECT caching and power-up sequencing.

use super::dp::{
    Abort, Ctrl, DebugPortId, DebugPortVersion, DpBankSel, DpRegister, BASEPTR0, BASEPTR1, DPIDR,
    DPIDR1, TARGETID,
};
use super::{ApAddress, ArmError, DpAddress, FullyQualifiedApAddress, Register};
use crate::probe::{DapError, DapTransport, DebugProbeError, PortType};

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// The deadline applied to all bounded polling loops in the ADI stack.
pub(crate) const ADI_TIMEOUT: Duration = Duration::from_millis(250);

/// JTAG IDCODE part number of fixed-version DPv0 JTAG-DPs. Reading DPIDR on
/// these is illegal, so the version must be assumed without it.
const JTAG_IDCODE_PARTNO_DPV0: u16 = 0xba00;

/// Erratum flags attached to a debug port.
#[derive(Debug, Default, Clone, Copy)]
pub struct DpQuirks {
    /// The DP is a minimal implementation (DPIDR MIN bit).
    pub minimal_dp: bool,
    /// The DP echoes one AP's registers at every APSEL value; only AP 0 is
    /// real and scanning was aborted.
    pub duplicated_ap: bool,
}

/// Raw DP/AP register access on an attached debug port.
///
/// Implemented by [`ArmCommunicationInterface`]; discovery code is written
/// against this trait so it can be driven by a mock in tests.
pub trait DapAccess {
    /// Read a raw DP register.
    fn read_raw_dp_register(&mut self, addr: u8, bank: DpBankSel) -> Result<u32, ArmError>;

    /// Write a raw DP register.
    fn write_raw_dp_register(
        &mut self,
        addr: u8,
        bank: DpBankSel,
        value: u32,
    ) -> Result<(), ArmError>;

    /// Read a raw AP register. `addr` is the ADIv5-style byte offset; for
    /// ADIv6 APs it is translated onto the 0xD00 register file.
    fn read_raw_ap_register(
        &mut self,
        ap: &FullyQualifiedApAddress,
        addr: u8,
    ) -> Result<u32, ArmError>;

    /// Write a raw AP register.
    fn write_raw_ap_register(
        &mut self,
        ap: &FullyQualifiedApAddress,
        addr: u8,
        value: u32,
    ) -> Result<(), ArmError>;

    /// Read the same AP register repeatedly (DRW streaming).
    fn read_raw_ap_register_repeated(
        &mut self,
        ap: &FullyQualifiedApAddress,
        addr: u8,
        values: &mut [u32],
    ) -> Result<(), ArmError> {
        for value in values.iter_mut() {
            *value = self.read_raw_ap_register(ap, addr)?;
        }
        Ok(())
    }

    /// Write the same AP register repeatedly (DRW streaming).
    fn write_raw_ap_register_repeated(
        &mut self,
        ap: &FullyQualifiedApAddress,
        addr: u8,
        values: &[u32],
    ) -> Result<(), ArmError> {
        for value in values {
            self.write_raw_ap_register(ap, addr, *value)?;
        }
        Ok(())
    }

    /// The detected version of this debug port.
    fn debug_port_version(&self) -> DebugPortVersion;

    /// The JEP106 designer code of the part, from TARGETID (DPv2+).
    ///
    /// Used by the AP configuration step to apply per-vendor BASE errata.
    fn target_designer_code(&self) -> Option<u16> {
        None
    }
}

/// The state of one attached debug port.
///
/// Owns the injected transport. The record is reference counted through
/// [`ArmCommunicationInterface`] clones held by every AP and target created
/// on it; the transport is released when the last clone is dropped.
struct DebugPort {
    transport: Box<dyn DapTransport>,
    address: DpAddress,
    id: DebugPortId,
    target_id: Option<u32>,
    quirks: DpQuirks,
    /// Resource bus address width in bits (ADIv6 only).
    address_width: u8,
    /// Set when a transfer came back with a FAULT acknowledgement; consumed
    /// by the next sticky-error check.
    fault: bool,
    /// Cached SELECT / SELECT1 values; `None` forces a rewrite.
    select: Option<u32>,
    select1: Option<u32>,
}

impl std::fmt::Debug for DebugPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugPort")
            .field("address", &self.address)
            .field("id", &self.id)
            .field("quirks", &self.quirks)
            .finish()
    }
}

/// A cloneable handle onto one debug port.
///
/// Every clone shares the same underlying [`DebugPort`]; this is the
/// ownership tree from the data model: DP ← APs ← targets, freed from the
/// leaves inward.
#[derive(Debug, Clone)]
pub struct ArmCommunicationInterface {
    dp: Rc<RefCell<DebugPort>>,
}

impl ArmCommunicationInterface {
    /// Attach to the debug port behind `transport`.
    ///
    /// `jtag_idcode` carries the TAP IDCODE when the transport is JTAG; a
    /// fixed DPv0 JTAG-DP is recognised by its part number and its DPIDR is
    /// never read (doing so is illegal on DPv0).
    pub fn connect(
        transport: Box<dyn DapTransport>,
        address: DpAddress,
        jtag_idcode: Option<u32>,
    ) -> Result<Self, ArmError> {
        let dp = DebugPort {
            transport,
            address,
            id: DebugPortId::from(DPIDR(0)),
            target_id: None,
            quirks: DpQuirks::default(),
            address_width: 0,
            fault: false,
            select: None,
            select1: None,
        };
        let mut interface = Self {
            dp: Rc::new(RefCell::new(dp)),
        };

        if let DpAddress::Multidrop(targetsel) = address {
            interface.select_multidrop_target(targetsel)?;
        }

        let fixed_dpv0 = jtag_idcode
            .map(|idcode| ((idcode >> 12) & 0xffff) as u16 == JTAG_IDCODE_PARTNO_DPV0)
            .unwrap_or(false);

        if fixed_dpv0 {
            let mut dp = interface.dp.borrow_mut();
            dp.id.version = DebugPortVersion::DPv0;
            tracing::debug!("Fixed DPv0 JTAG-DP, skipping DPIDR read");
        } else {
            // A failing DPIDR read means there is nothing usable on the
            // wire; this aborts the whole probe attempt.
            let raw_dpidr = interface
                .low_access(true, PortType::DebugPort, DPIDR::ADDRESS, 0)
                .map_err(|_| ArmError::NoUsableDp)?;
            let id = DebugPortId::from(DPIDR(raw_dpidr));
            tracing::debug!("DPIDR {raw_dpidr:#010x}: {id:?}");

            let mut dp = interface.dp.borrow_mut();
            dp.quirks.minimal_dp = id.min_dp_support;
            dp.id = id;
        }

        interface.debug_port_start()?;

        // TARGETID identifies the part for multi-drop addressing and only
        // exists from DPv2 on.
        if interface.debug_port_version() >= DebugPortVersion::DPv2 {
            let target_id: u32 = interface.read_dp_register::<TARGETID>()?.into();
            tracing::debug!("TARGETID: {target_id:#010x}");
            interface.dp.borrow_mut().target_id = Some(target_id);
        }

        if interface.debug_port_version() == DebugPortVersion::DPv3 {
            interface.read_address_width()?;
        }

        Ok(interface)
    }

    /// The wire address of this DP.
    pub fn dp_address(&self) -> DpAddress {
        self.dp.borrow().address
    }

    /// The decoded DPIDR contents.
    pub fn debug_port_id(&self) -> DebugPortId {
        self.dp.borrow().id.clone()
    }

    /// The quirk flags of this DP.
    pub fn quirks(&self) -> DpQuirks {
        self.dp.borrow().quirks
    }

    /// Flag the duplicated-AP erratum on this DP.
    pub(crate) fn set_duplicated_ap_quirk(&self) {
        self.dp.borrow_mut().quirks.duplicated_ap = true;
    }

    /// The resource bus address width advertised in DPIDR1 (ADIv6).
    pub fn address_width(&self) -> u8 {
        self.dp.borrow().address_width
    }

    /// Read a typed DP register.
    pub fn read_dp_register<R: DpRegister>(&mut self) -> Result<R, ArmError> {
        let raw = self.read_raw_dp_register(R::ADDRESS, R::DP_BANK)?;
        tracing::trace!("Read DP register {}: {raw:#010x}", R::NAME);
        Ok(raw.into())
    }

    /// Write a typed DP register.
    pub fn write_dp_register<R: DpRegister>(&mut self, register: R) -> Result<(), ArmError> {
        tracing::trace!("Writing DP register {}: {register:x?}", R::NAME);
        self.write_raw_dp_register(R::ADDRESS, R::DP_BANK, register.into())
    }

    /// Select a multi-drop target: line reset, then a TARGETSEL write that
    /// no device acknowledges.
    fn select_multidrop_target(&mut self, targetsel: u32) -> Result<(), ArmError> {
        tracing::debug!("Selecting multi-drop target {targetsel:#010x}");
        let mut dp = self.dp.borrow_mut();
        // 50+ clocks with SWDIO high put every DP on the wire in line reset.
        dp.transport.swj_sequence(51, 0x0007_ffff_ffff_ffff)?;
        dp.transport.raw_write_no_ack(0xC, targetsel)?;
        dp.select = None;
        dp.select1 = None;
        Ok(())
    }

    /// Power up the debug domain: request system and debug power and poll
    /// the acknowledge bits, then clear any stale sticky errors.
    fn debug_port_start(&mut self) -> Result<(), ArmError> {
        self.write_raw_dp_register(
            super::dp::Select::ADDRESS,
            DpBankSel::DontCare,
            0,
        )?;

        let ctrl = self.read_dp_register::<Ctrl>()?;
        let powered_down = !(ctrl.csyspwrupack() && ctrl.cdbgpwrupack());
        if powered_down {
            tracing::debug!("Requesting debug power");
            let mut ctrl = Ctrl::default();
            ctrl.set_csyspwrupreq(true);
            ctrl.set_cdbgpwrupreq(true);
            self.write_dp_register(ctrl)?;

            let start = Instant::now();
            loop {
                let ctrl = self.read_dp_register::<Ctrl>()?;
                if ctrl.csyspwrupack() && ctrl.cdbgpwrupack() {
                    break;
                }
                if start.elapsed() >= ADI_TIMEOUT {
                    tracing::error!("Debug power-up request was not acknowledged");
                    return Err(ArmError::Probe(DapError::TargetPowerUpFailed.into()));
                }
            }

            // Include all byte lanes in pushed operations, keep power
            // requests asserted.
            let mut ctrl = Ctrl::default();
            ctrl.set_csyspwrupreq(true);
            ctrl.set_cdbgpwrupreq(true);
            ctrl.set_mask_lane(0b1111);
            self.write_dp_register(ctrl)?;

            if self.debug_port_version() != DebugPortVersion::DPv0 {
                self.write_dp_register(Abort::clear_all())?;
            }
        }

        Ok(())
    }

    /// Read DPIDR1 for the DP bus address width (ADIv6).
    fn read_address_width(&mut self) -> Result<(), ArmError> {
        let dpidr1 = self.read_dp_register::<DPIDR1>()?;
        tracing::debug!("DPIDR1: {dpidr1:x?}, {}-bit addressing", dpidr1.asize());
        self.dp.borrow_mut().address_width = dpidr1.asize();
        Ok(())
    }

    /// Read the ADIv6 root resource address from BASEPTR0/1.
    ///
    /// Returns `None` when the valid bit is clear or the address does not
    /// fit the advertised width: the DP carries nothing debuggable.
    pub fn read_base_address(&mut self) -> Result<Option<u64>, ArmError> {
        let baseptr0 = self.read_dp_register::<BASEPTR0>()?;
        let baseptr1: u32 = self.read_dp_register::<BASEPTR1>()?.into();
        let base = u64::from(baseptr1) << 32 | u64::from(u32::from(baseptr0) & !1);

        if !baseptr0.valid() {
            tracing::info!("No valid base address on DP");
            return Ok(None);
        }
        let width = self.address_width();
        if width < 64 && base & !((1u64 << width) - 1) != 0 {
            tracing::info!("Base address {base:#x} exceeds the DP's {width}-bit address range");
            return Ok(None);
        }
        Ok(Some(base))
    }

    /// Check and clear the DP error state.
    ///
    /// Returns whether a fault was latched since the last call, either from
    /// a FAULT acknowledgement or from the CTRL/STAT sticky error flag, and
    /// clears the condition so the next transaction starts clean.
    pub fn dp_error(&mut self) -> Result<bool, ArmError> {
        let latched = std::mem::replace(&mut self.dp.borrow_mut().fault, false);
        let ctrl = self.read_dp_register::<Ctrl>()?;
        let sticky = ctrl.sticky_err() || ctrl.sticky_orun() || ctrl.w_data_err();
        if sticky {
            self.clear_sticky_errors()?;
        }
        Ok(latched || sticky)
    }

    fn clear_sticky_errors(&mut self) -> Result<(), ArmError> {
        if self.debug_port_version() == DebugPortVersion::DPv0 {
            // DPv0 JTAG-DPs clear sticky flags by writing them back to
            // CTRL/STAT instead of through ABORT.
            let ctrl: u32 = self.read_dp_register::<Ctrl>()?.into();
            self.write_dp_register(Ctrl::from(ctrl & Ctrl::ERROR_MASK))
        } else {
            self.write_dp_register(Abort::clear_all())
        }
    }

    /// One raw transfer with the one-shot no-response recovery.
    ///
    /// On a NO-RESPONSE acknowledgement: flush the turnaround period, clear
    /// the sticky error state through ABORT (or CTRL/STAT on DPv0) and retry
    /// exactly once. A second no-response is the fatal `SwdInvalidAck`.
    fn low_access(
        &mut self,
        rnw: bool,
        port: PortType,
        addr: u8,
        value: u32,
    ) -> Result<u32, ArmError> {
        match self.raw_transfer(rnw, port, addr, value) {
            Err(ArmError::Probe(DebugProbeError::Dap(DapError::NoAcknowledge))) => {
                tracing::warn!("SWD access got no response, attempting protocol recovery");
                self.recover_from_no_response()?;
                match self.raw_transfer(rnw, port, addr, value) {
                    Err(ArmError::Probe(DebugProbeError::Dap(DapError::NoAcknowledge))) => {
                        tracing::error!("SWD access got no response twice, giving up");
                        Err(ArmError::SwdInvalidAck)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    fn raw_transfer(
        &mut self,
        rnw: bool,
        port: PortType,
        addr: u8,
        value: u32,
    ) -> Result<u32, ArmError> {
        let mut dp = self.dp.borrow_mut();
        let result = if rnw {
            dp.transport.raw_read_register(port, addr)
        } else {
            dp.transport.raw_write_register(port, addr, value).map(|_| 0)
        };
        match result {
            Ok(value) => Ok(value),
            Err(DebugProbeError::Dap(DapError::FaultResponse)) => {
                // The fault is latched here and surfaced to the next
                // sticky-error check; see `dp_error`.
                dp.fault = true;
                Err(ArmError::Probe(DapError::FaultResponse.into()))
            }
            Err(DebugProbeError::Dap(DapError::WaitResponse)) => {
                // The driver retries WAITs itself; if it still reports one
                // the transaction is stuck, so knock it down.
                let abort: u32 = {
                    let mut abort = Abort(0);
                    abort.set_dapabort(true);
                    abort.into()
                };
                dp.transport.raw_abort(abort)?;
                Err(ArmError::Probe(DapError::WaitResponse.into()))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// The protocol-level recovery between the two attempts of
    /// [`Self::low_access`].
    fn recover_from_no_response(&mut self) -> Result<(), ArmError> {
        let version = self.dp.borrow().id.version;
        {
            let mut dp = self.dp.borrow_mut();
            // Eight idle clocks flush whatever is left of the wedged
            // transfer's turnaround period.
            dp.transport.swj_sequence(8, 0)?;
            // The SELECT cache can no longer be trusted.
            dp.select = None;
            dp.select1 = None;
            if version != DebugPortVersion::DPv0 {
                dp.transport.raw_abort(Abort::clear_all().into())?;
            }
        }
        if version == DebugPortVersion::DPv0 {
            let ctrl: u32 = self.read_dp_register::<Ctrl>()?.into();
            self.write_dp_register(Ctrl::from(ctrl & Ctrl::ERROR_MASK))?;
        }
        Ok(())
    }

    /// Make sure SELECT(/SELECT1) matches the wanted value, rewriting only
    /// on change.
    fn update_select(&mut self, select: u32, select1: Option<u32>) -> Result<(), ArmError> {
        if let Some(select1) = select1 {
            if self.dp.borrow().select1 != Some(select1) {
                // SELECT1 shares address 0x4 with CTRL/STAT and lives in DP
                // bank 5, which has to be chosen through SELECT first.
                let bank5 = (select & !0xf) | 5;
                self.low_access(false, PortType::DebugPort, 0x8, bank5)?;
                self.dp.borrow_mut().select = Some(bank5);
                self.low_access(false, PortType::DebugPort, 0x4, select1)?;
                self.dp.borrow_mut().select1 = Some(select1);
            }
        }
        if self.dp.borrow().select != Some(select) {
            self.low_access(false, PortType::DebugPort, 0x8, select)?;
            self.dp.borrow_mut().select = Some(select);
        }
        Ok(())
    }

    /// Read a word from the DP resource bus (ADIv6).
    ///
    /// SELECT/SELECT1 map a 4 KiB window of the resource bus onto the AP
    /// transfer space; this is how the root ROM table is reached before
    /// any AP exists.
    pub(crate) fn read_resource_word(&mut self, address: u64) -> Result<u32, ArmError> {
        let select = (address as u32 & 0xffff_f000) | (address as u32 & 0xff0);
        self.update_select(select, Some((address >> 32) as u32))?;
        self.low_access(true, PortType::AccessPort, (address & 0xC) as u8, 0)
    }

    /// Write a word on the DP resource bus (ADIv6).
    pub(crate) fn write_resource_word(&mut self, address: u64, value: u32) -> Result<(), ArmError> {
        let select = (address as u32 & 0xffff_f000) | (address as u32 & 0xff0);
        self.update_select(select, Some((address >> 32) as u32))?;
        self.low_access(false, PortType::AccessPort, (address & 0xC) as u8, value)?;
        Ok(())
    }

    /// Program SELECT for a DP register access.
    fn select_dp_bank(&mut self, addr: u8, bank: DpBankSel) -> Result<(), ArmError> {
        let DpBankSel::Bank(bank) = bank else {
            return Ok(());
        };
        // Only addresses 0x0 and 0x4 are banked; SELECT and RDBUFF are not.
        if addr > 0x4 {
            return Ok(());
        }
        let current = self.dp.borrow().select.unwrap_or(0);
        self.update_select((current & !0xf) | u32::from(bank), None)
    }

    /// Program SELECT(/SELECT1) for an AP register access and return the
    /// wire address to use.
    fn select_ap_bank(&mut self, ap: &FullyQualifiedApAddress, addr: u8) -> Result<u8, ArmError> {
        match ap.ap() {
            ApAddress::V1(apsel) => {
                let select =
                    u32::from(apsel) << 24 | u32::from(addr >> 4) << 4;
                self.update_select(select, None)?;
                Ok(addr & 0xC)
            }
            ApAddress::V2(base) => {
                // ADIv6 AP register files sit at 0xD00 of the AP's 4 KiB
                // block; SELECT carries the block address plus the bank.
                let offset = 0xd00 | u32::from(addr);
                let select = (base as u32 & 0xffff_f000) | (offset & 0xff0);
                self.update_select(select, Some((base >> 32) as u32))?;
                Ok(addr & 0xC)
            }
        }
    }
}

impl DapAccess for ArmCommunicationInterface {
    fn read_raw_dp_register(&mut self, addr: u8, bank: DpBankSel) -> Result<u32, ArmError> {
        self.select_dp_bank(addr, bank)?;
        self.low_access(true, PortType::DebugPort, addr, 0)
    }

    fn write_raw_dp_register(
        &mut self,
        addr: u8,
        bank: DpBankSel,
        value: u32,
    ) -> Result<(), ArmError> {
        self.select_dp_bank(addr, bank)?;
        // Keep the cache coherent when the caller writes SELECT directly.
        if addr == 0x8 {
            self.dp.borrow_mut().select = Some(value);
        }
        self.low_access(false, PortType::DebugPort, addr, value)?;
        Ok(())
    }

    fn read_raw_ap_register(
        &mut self,
        ap: &FullyQualifiedApAddress,
        addr: u8,
    ) -> Result<u32, ArmError> {
        let wire_addr = self.select_ap_bank(ap, addr)?;
        self.low_access(true, PortType::AccessPort, wire_addr, 0)
    }

    fn write_raw_ap_register(
        &mut self,
        ap: &FullyQualifiedApAddress,
        addr: u8,
        value: u32,
    ) -> Result<(), ArmError> {
        let wire_addr = self.select_ap_bank(ap, addr)?;
        self.low_access(false, PortType::AccessPort, wire_addr, value)?;
        Ok(())
    }

    fn debug_port_version(&self) -> DebugPortVersion {
        self.dp.borrow().id.version
    }

    fn target_designer_code(&self) -> Option<u16> {
        self.dp
            .borrow()
            .target_id
            .map(|id| ((id >> 1) & 0x7ff) as u16)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::Ack;

    /// A scripted transport: a list of expected transfers with canned
    /// responses.
    struct MockTransport {
        ops: Vec<MockOp>,
        cursor: usize,
    }

    struct MockOp {
        read: bool,
        port: PortType,
        addr: u8,
        value: u32,
        ack: Ack,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                ops: Vec::new(),
                cursor: 0,
            }
        }

        fn expect_read(&mut self, port: PortType, addr: u8, value: u32) {
            self.expect(MockOp {
                read: true,
                port,
                addr,
                value,
                ack: Ack::Ok,
            });
        }

        fn expect_write(&mut self, port: PortType, addr: u8, value: u32) {
            self.expect(MockOp {
                read: false,
                port,
                addr,
                value,
                ack: Ack::Ok,
            });
        }

        fn expect_ack(&mut self, read: bool, port: PortType, addr: u8, ack: Ack) {
            self.expect(MockOp {
                read,
                port,
                addr,
                value: 0,
                ack,
            });
        }

        fn expect(&mut self, op: MockOp) {
            self.ops.push(op);
        }

        fn next(&mut self, read: bool, port: PortType, addr: u8) -> Result<u32, DebugProbeError> {
            let op = self
                .ops
                .get(self.cursor)
                .unwrap_or_else(|| panic!("Unexpected transfer: port {port:?} addr {addr:#x}"));
            self.cursor += 1;
            assert_eq!(op.read, read, "R/W mismatch at op {}", self.cursor);
            assert_eq!(op.port, port, "Port mismatch at op {}", self.cursor);
            assert_eq!(op.addr, addr, "Address mismatch at op {}", self.cursor);
            match op.ack {
                Ack::Ok => Ok(op.value),
                ack => Err(DapError::from(ack).into()),
            }
        }
    }

    impl DapTransport for MockTransport {
        fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, DebugProbeError> {
            self.next(true, port, addr)
        }

        fn raw_write_register(
            &mut self,
            port: PortType,
            addr: u8,
            value: u32,
        ) -> Result<(), DebugProbeError> {
            let expected = self.next(false, port, addr)?;
            if self.ops[self.cursor - 1].ack == Ack::Ok {
                assert_eq!(
                    expected, value,
                    "Write value mismatch at op {}",
                    self.cursor
                );
            }
            Ok(())
        }

        fn swj_sequence(&mut self, _bit_len: u8, _bits: u64) -> Result<(), DebugProbeError> {
            Ok(())
        }
    }

    const DPIDR_DPV1: u32 = 0x2ba0_1477;

    fn expect_connect_sequence(probe: &mut MockTransport) {
        // DPIDR read.
        probe.expect_read(PortType::DebugPort, 0x0, DPIDR_DPV1);
        // SELECT cleared, CTRL/STAT read: already powered.
        probe.expect_write(PortType::DebugPort, 0x8, 0);
        probe.expect_read(PortType::DebugPort, 0x4, 0xf000_0000);
    }

    #[test]
    fn connect_powers_up_the_debug_domain() {
        let mut probe = MockTransport::new();
        probe.expect_read(PortType::DebugPort, 0x0, DPIDR_DPV1);
        probe.expect_write(PortType::DebugPort, 0x8, 0);
        // Powered down: engine requests power and polls for the acks.
        probe.expect_read(PortType::DebugPort, 0x4, 0);
        probe.expect_write(PortType::DebugPort, 0x4, 0x5000_0000);
        probe.expect_read(PortType::DebugPort, 0x4, 0xf000_0000);
        // Mask lane setup and sticky clear.
        probe.expect_write(PortType::DebugPort, 0x4, 0x5000_0f00);
        probe.expect_write(PortType::DebugPort, 0x0, 0b11110);

        let interface =
            ArmCommunicationInterface::connect(Box::new(probe), DpAddress::Default, None).unwrap();
        assert_eq!(interface.debug_port_version(), DebugPortVersion::DPv1);
    }

    #[test]
    fn no_response_is_retried_exactly_once() {
        let mut probe = MockTransport::new();
        expect_connect_sequence(&mut probe);
        // Bank selection for IDR (0xFC), then the transfer gets no
        // response. Recovery writes ABORT and the retry succeeds.
        probe.expect_write(PortType::DebugPort, 0x8, 0x0000_00f0);
        probe.expect_ack(true, PortType::AccessPort, 0xC, Ack::NoResponse);
        probe.expect_write(PortType::DebugPort, 0x0, 0b11110);
        probe.expect_read(PortType::AccessPort, 0xC, 0x1234_5678);

        let mut interface =
            ArmCommunicationInterface::connect(Box::new(probe), DpAddress::Default, None).unwrap();

        let ap = FullyQualifiedApAddress::v1_with_dp(DpAddress::Default, 0);
        let value = interface.read_raw_ap_register(&ap, 0xFC);
        assert_eq!(value.unwrap(), 0x1234_5678);
    }

    #[test]
    fn second_no_response_is_fatal() {
        let mut probe = MockTransport::new();
        expect_connect_sequence(&mut probe);
        probe.expect_ack(true, PortType::DebugPort, 0x4, Ack::NoResponse);
        probe.expect_write(PortType::DebugPort, 0x0, 0b11110);
        probe.expect_ack(true, PortType::DebugPort, 0x4, Ack::NoResponse);

        let mut interface =
            ArmCommunicationInterface::connect(Box::new(probe), DpAddress::Default, None).unwrap();

        let result = interface.read_raw_dp_register(0x4, DpBankSel::Bank(0));
        assert!(matches!(result, Err(ArmError::SwdInvalidAck)));
    }

    #[test]
    fn fault_response_sets_the_fault_latch() {
        let mut probe = MockTransport::new();
        expect_connect_sequence(&mut probe);
        probe.expect_ack(true, PortType::DebugPort, 0x4, Ack::Fault);
        // dp_error: CTRL/STAT read shows no sticky bits; latch alone
        // reports the fault.
        probe.expect_read(PortType::DebugPort, 0x4, 0xf000_0000);

        let mut interface =
            ArmCommunicationInterface::connect(Box::new(probe), DpAddress::Default, None).unwrap();

        let result = interface.read_raw_dp_register(0x4, DpBankSel::Bank(0));
        assert!(result.is_err());
        assert!(interface.dp_error().unwrap());
    }
}
