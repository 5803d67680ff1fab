//! Debug Port register definitions, DPv0 through DPv3.

use super::Register;
use bitfield::bitfield;
use jep106::JEP106Code;

/// DP bank requirement of a DP register.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DpBankSel {
    /// The register is reachable regardless of DPBANKSEL.
    DontCare,
    /// The register needs DPBANKSEL set to this bank.
    Bank(u8),
}

/// A register of the Debug Port.
pub trait DpRegister: Register {
    /// The DP bank this register lives in.
    const DP_BANK: DpBankSel;
}

/// The version of a Debug Port implementation.
///
/// Versions order by capability; `Unsupported` sorts last.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone)]
pub enum DebugPortVersion {
    /// JTAG-DP without a DPIDR register.
    DPv0,
    /// First SWD capable revision.
    DPv1,
    /// Adds TARGETID/TARGETSEL and multi-drop SWD.
    DPv2,
    /// ADIv6: adds DPIDR1 and the 64-bit resource bus base pointer.
    DPv3,
    /// A version field this crate does not know.
    Unsupported(u8),
}

impl From<u8> for DebugPortVersion {
    fn from(value: u8) -> Self {
        match value {
            0 => DebugPortVersion::DPv0,
            1 => DebugPortVersion::DPv1,
            2 => DebugPortVersion::DPv2,
            3 => DebugPortVersion::DPv3,
            other => DebugPortVersion::Unsupported(other),
        }
    }
}

bitfield! {
    /// The DPIDR register, identifying the debug port.
    #[derive(Copy, Clone)]
    pub struct DPIDR(u32);
    impl Debug;
    /// Implementation defined revision.
    pub u8, revision, _: 31, 28;
    /// Part number of the DP.
    pub u8, part_no, _: 27, 20;
    /// Minimal DP implementation (no transaction counter, pushed operations).
    pub min, _: 16;
    /// DP architecture version.
    pub u8, version, _: 15, 12;
    /// JEP106 designer code, continuation and identity.
    pub u16, designer, _: 11, 1;
    u8, jep_cc, _: 11, 8;
    u8, jep_id, _: 7, 1;
    /// Always reads one on a valid DPIDR.
    pub designer_present, _: 0;
}

impl From<u32> for DPIDR {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<DPIDR> for u32 {
    fn from(raw: DPIDR) -> Self {
        raw.0
    }
}

impl Register for DPIDR {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "DPIDR";
}

impl DpRegister for DPIDR {
    const DP_BANK: DpBankSel = DpBankSel::DontCare;
}

/// Decoded DPIDR contents.
#[derive(Debug, Clone)]
pub struct DebugPortId {
    /// Implementation defined revision.
    pub revision: u8,
    /// Part number of the DP.
    pub part_no: u8,
    /// DP architecture version.
    pub version: DebugPortVersion,
    /// Whether this is a minimal DP implementation.
    pub min_dp_support: bool,
    /// The designer of the DP (not the implementer).
    pub designer: JEP106Code,
}

impl From<DPIDR> for DebugPortId {
    fn from(dpidr: DPIDR) -> DebugPortId {
        // Bit 0 reads as one on every conformant DP. If it is clear the read
        // returned garbage (line glitch, no DP) and none of the decoded
        // fields can be trusted.
        if !dpidr.designer_present() {
            return DebugPortId {
                revision: 0,
                part_no: 0,
                version: DebugPortVersion::DPv0,
                min_dp_support: false,
                designer: JEP106Code::new(0, 0),
            };
        }
        DebugPortId {
            revision: dpidr.revision(),
            part_no: dpidr.part_no(),
            version: dpidr.version().into(),
            min_dp_support: dpidr.min(),
            designer: JEP106Code::new(dpidr.jep_cc(), dpidr.jep_id()),
        }
    }
}

bitfield! {
    /// The ABORT register. Write-only, clears sticky error conditions.
    #[derive(Copy, Clone, Default)]
    pub struct Abort(u32);
    impl Debug;
    /// Clear the sticky overrun flag.
    pub _, set_orunerrclr: 4;
    /// Clear the write data error flag.
    pub _, set_wderrclr: 3;
    /// Clear the sticky error flag.
    pub _, set_stkerrclr: 2;
    /// Clear the sticky compare flag.
    pub _, set_stkcmpclr: 1;
    /// Abort the current AP transaction.
    pub _, set_dapabort: 0;
}

impl Abort {
    /// An ABORT value clearing every sticky flag.
    pub fn clear_all() -> Self {
        let mut abort = Abort(0);
        abort.set_orunerrclr(true);
        abort.set_wderrclr(true);
        abort.set_stkerrclr(true);
        abort.set_stkcmpclr(true);
        abort
    }
}

impl From<u32> for Abort {
    fn from(raw: u32) -> Self {
        Abort(raw)
    }
}

impl From<Abort> for u32 {
    fn from(raw: Abort) -> Self {
        raw.0
    }
}

impl Register for Abort {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "ABORT";
}

impl DpRegister for Abort {
    const DP_BANK: DpBankSel = DpBankSel::DontCare;
}

bitfield! {
    /// The CTRL/STAT register.
    #[derive(Copy, Clone, Default)]
    pub struct Ctrl(u32);
    impl Debug;
    /// System power-up acknowledge.
    pub csyspwrupack, _: 31;
    /// System power-up request.
    pub csyspwrupreq, set_csyspwrupreq: 30;
    /// Debug power-up acknowledge.
    pub cdbgpwrupack, _: 29;
    /// Debug power-up request.
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    /// Debug reset acknowledge.
    pub cdbgrstack, _: 27;
    /// Debug reset request.
    pub cdbgrstreq, set_cdbgrstreq: 26;
    /// Transaction counter.
    pub u16, trn_cnt, set_trn_cnt: 23, 12;
    /// Byte lane mask for pushed operations.
    pub u8, mask_lane, set_mask_lane: 11, 8;
    /// A parity/framing error occurred on a write (SW-DP only).
    pub w_data_err, _: 7;
    /// The response to a previous AP or RDBUFF read was OK.
    pub read_ok, _: 6;
    /// Sticky error: an AP transaction failed.
    pub sticky_err, _: 5;
    /// Sticky compare flag.
    pub sticky_cmp, _: 4;
    /// Transfer mode.
    pub u8, trn_mode, set_trn_mode: 3, 2;
    /// Sticky overrun flag.
    pub sticky_orun, _: 1;
    /// Enable overrun detection.
    pub orun_detect, set_orun_detect: 0;
}

impl Ctrl {
    /// Mask of the sticky error flags and power-up request state, used to
    /// write error conditions back on a DPv0 JTAG-DP (which has no ABORT
    /// based clearing).
    pub const ERROR_MASK: u32 = 0xf000_0032;
}

impl From<u32> for Ctrl {
    fn from(raw: u32) -> Self {
        Ctrl(raw)
    }
}

impl From<Ctrl> for u32 {
    fn from(raw: Ctrl) -> Self {
        raw.0
    }
}

impl Register for Ctrl {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "CTRL/STAT";
}

impl DpRegister for Ctrl {
    const DP_BANK: DpBankSel = DpBankSel::Bank(0);
}

bitfield! {
    /// The SELECT register: AP selection and DP/AP register banking.
    ///
    /// On ADIv6 DPs the APSEL/APBANKSEL fields are replaced by the low half
    /// of the AP resource address; see `Select1`.
    #[derive(Copy, Clone, Default)]
    pub struct Select(u32);
    impl Debug;
    /// The selected AP (ADIv5).
    pub u8, ap_sel, set_ap_sel: 31, 24;
    /// The selected AP register bank (ADIv5).
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    /// The selected DP register bank.
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl From<u32> for Select {
    fn from(raw: u32) -> Self {
        Select(raw)
    }
}

impl From<Select> for u32 {
    fn from(raw: Select) -> Self {
        raw.0
    }
}

impl Register for Select {
    const ADDRESS: u8 = 0x8;
    const NAME: &'static str = "SELECT";
}

impl DpRegister for Select {
    const DP_BANK: DpBankSel = DpBankSel::DontCare;
}

/// The SELECT1 register: the high half of the ADIv6 AP resource address.
#[derive(Debug, Copy, Clone)]
pub struct Select1(pub u32);

impl From<u32> for Select1 {
    fn from(raw: u32) -> Self {
        Select1(raw)
    }
}

impl From<Select1> for u32 {
    fn from(raw: Select1) -> Self {
        raw.0
    }
}

impl Register for Select1 {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "SELECT1";
}

impl DpRegister for Select1 {
    const DP_BANK: DpBankSel = DpBankSel::Bank(5);
}

/// The RDBUFF register, returning the result of the last posted read.
#[derive(Debug, Copy, Clone)]
pub struct RdBuff(pub u32);

impl From<u32> for RdBuff {
    fn from(raw: u32) -> Self {
        RdBuff(raw)
    }
}

impl From<RdBuff> for u32 {
    fn from(raw: RdBuff) -> Self {
        raw.0
    }
}

impl Register for RdBuff {
    const ADDRESS: u8 = 0xC;
    const NAME: &'static str = "RDBUFF";
}

impl DpRegister for RdBuff {
    const DP_BANK: DpBankSel = DpBankSel::DontCare;
}

bitfield! {
    /// The TARGETID register (DPv2+), identifying the part for multi-drop
    /// addressing.
    #[derive(Copy, Clone)]
    pub struct TARGETID(u32);
    impl Debug;
    /// Revision.
    pub u8, trevision, _: 31, 28;
    /// Designer assigned part number.
    pub u16, tpartno, _: 27, 12;
    /// JEP106 designer code of the part.
    pub u16, tdesigner, _: 11, 1;
}

impl From<u32> for TARGETID {
    fn from(raw: u32) -> Self {
        TARGETID(raw)
    }
}

impl From<TARGETID> for u32 {
    fn from(raw: TARGETID) -> Self {
        raw.0
    }
}

impl Register for TARGETID {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "TARGETID";
}

impl DpRegister for TARGETID {
    const DP_BANK: DpBankSel = DpBankSel::Bank(2);
}

/// The TARGETSEL register (DPv2+), written during line reset to select one
/// DP of a multi-drop configuration. Never acknowledged.
#[derive(Debug, Copy, Clone)]
pub struct TARGETSEL(pub u32);

impl From<u32> for TARGETSEL {
    fn from(raw: u32) -> Self {
        TARGETSEL(raw)
    }
}

impl From<TARGETSEL> for u32 {
    fn from(raw: TARGETSEL) -> Self {
        raw.0
    }
}

impl Register for TARGETSEL {
    const ADDRESS: u8 = 0xC;
    const NAME: &'static str = "TARGETSEL";
}

impl DpRegister for TARGETSEL {
    const DP_BANK: DpBankSel = DpBankSel::DontCare;
}

bitfield! {
    /// The DPIDR1 register (ADIv6), describing the resource bus address size.
    #[derive(Copy, Clone)]
    pub struct DPIDR1(u32);
    impl Debug;
    /// Error mode support.
    pub errmode, _: 7;
    /// Width in bits of the DP resource bus addresses.
    pub u8, asize, _: 6, 0;
}

impl From<u32> for DPIDR1 {
    fn from(raw: u32) -> Self {
        DPIDR1(raw)
    }
}

impl From<DPIDR1> for u32 {
    fn from(raw: DPIDR1) -> Self {
        raw.0
    }
}

impl Register for DPIDR1 {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "DPIDR1";
}

impl DpRegister for DPIDR1 {
    const DP_BANK: DpBankSel = DpBankSel::Bank(1);
}

bitfield! {
    /// The BASEPTR0 register (ADIv6): low half of the root resource address.
    #[derive(Copy, Clone)]
    pub struct BASEPTR0(u32);
    impl Debug;
    /// Bits 31:12 of the low address word.
    pub u32, ptr, _: 31, 12;
    /// The base pointer is valid.
    pub valid, _: 0;
}

impl From<u32> for BASEPTR0 {
    fn from(raw: u32) -> Self {
        BASEPTR0(raw)
    }
}

impl From<BASEPTR0> for u32 {
    fn from(raw: BASEPTR0) -> Self {
        raw.0
    }
}

impl Register for BASEPTR0 {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "BASEPTR0";
}

impl DpRegister for BASEPTR0 {
    const DP_BANK: DpBankSel = DpBankSel::Bank(2);
}

/// The BASEPTR1 register (ADIv6): high half of the root resource address.
#[derive(Debug, Copy, Clone)]
pub struct BASEPTR1(pub u32);

impl From<u32> for BASEPTR1 {
    fn from(raw: u32) -> Self {
        BASEPTR1(raw)
    }
}

impl From<BASEPTR1> for u32 {
    fn from(raw: BASEPTR1) -> Self {
        raw.0
    }
}

impl Register for BASEPTR1 {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "BASEPTR1";
}

impl DpRegister for BASEPTR1 {
    const DP_BANK: DpBankSel = DpBankSel::Bank(3);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dpidr_decodes_version_and_designer() {
        // An ARM designed (0x43b) DPv2.
        let dpidr = DPIDR(0x2ba0_2477);
        let id = DebugPortId::from(dpidr);

        assert_eq!(id.version, DebugPortVersion::DPv2);
        assert_eq!(id.designer.cc, 0x4);
        assert_eq!(id.designer.id, 0x3b);
        assert!(!id.min_dp_support);
    }

    #[test]
    fn invalid_dpidr_is_forced_to_dpv0() {
        // Bit 0 clear: the read returned garbage. The decoded version and
        // designer must be forced to DPv0/zero, not the bogus field values.
        let dpidr = DPIDR(0x2ba0_2476);
        let id = DebugPortId::from(dpidr);

        assert_eq!(id.version, DebugPortVersion::DPv0);
        assert_eq!(id.designer, JEP106Code::new(0, 0));
        assert_eq!(id.part_no, 0);
    }

    #[test]
    fn abort_clear_all_sets_every_clear_bit() {
        assert_eq!(u32::from(Abort::clear_all()), 0b11110);
    }
}
