//! Access Port discovery and configuration.

pub mod memory_ap;
pub mod v1;
pub mod v2;

pub use memory_ap::MemoryAp;

use super::communication_interface::DapAccess;
use super::{ArmError, FullyQualifiedApAddress, Register};
use bitfield::bitfield;

bitfield! {
    /// The AP IDR register, identifying class, designer and bus type of an
    /// access port.
    #[derive(Copy, Clone, PartialEq)]
    pub struct Idr(u32);
    impl Debug;
    /// Revision of the AP design.
    pub u8, revision, _: 31, 28;
    /// JEP106 designer code of the AP design.
    pub u16, designer, _: 27, 17;
    /// The class of the AP.
    pub u8, class, _: 16, 13;
    /// Implementation defined variant.
    pub u8, variant, _: 7, 4;
    /// The type of bus behind a MEM-AP.
    pub u8, ap_type, _: 3, 0;
}

impl From<u32> for Idr {
    fn from(raw: u32) -> Self {
        Idr(raw)
    }
}

impl From<Idr> for u32 {
    fn from(raw: Idr) -> Self {
        raw.0
    }
}

impl Register for Idr {
    const ADDRESS: u8 = 0xFC;
    const NAME: &'static str = "IDR";
}

/// AP classes from the IDR CLASS field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApClass {
    /// No class defined: a JTAG-AP or an undefined AP.
    Undefined,
    /// A COM-AP.
    ComAp,
    /// A memory access port.
    MemAp,
    /// Any other class value.
    Other(u8),
}

impl From<u8> for ApClass {
    fn from(value: u8) -> Self {
        match value {
            0x0 => ApClass::Undefined,
            0x1 => ApClass::ComAp,
            0x8 => ApClass::MemAp,
            other => ApClass::Other(other),
        }
    }
}

/// The bus type of an ARM designed MEM-AP, from the IDR TYPE field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApType {
    /// AMBA AHB3 bus.
    AmbaAhb3,
    /// AMBA APB2 or APB3 bus.
    AmbaApb2Apb3,
    /// AMBA AXI3 or AXI4 bus.
    AmbaAxi3Axi4,
    /// AMBA AHB5 bus.
    AmbaAhb5,
    /// AMBA APB4 or APB5 bus.
    AmbaApb4Apb5,
    /// AMBA AXI5 bus.
    AmbaAxi5,
    /// AMBA AHB5 bus with enhanced HPROT control.
    AmbaAhb5Hprot,
    /// Not a known memory bus type.
    Unknown(u8),
}

impl From<u8> for ApType {
    fn from(value: u8) -> Self {
        match value {
            0x1 => ApType::AmbaAhb3,
            0x2 => ApType::AmbaApb2Apb3,
            0x4 => ApType::AmbaAxi3Axi4,
            0x5 => ApType::AmbaAhb5,
            0x6 => ApType::AmbaApb4Apb5,
            0x7 => ApType::AmbaAxi5,
            0x8 => ApType::AmbaAhb5Hprot,
            other => ApType::Unknown(other),
        }
    }
}

/// CSW bit constants shared by the bus-specific fixups.
mod csw {
    pub const DBGSWENABLE: u32 = 1 << 31;
    pub const SPIDEN: u32 = 1 << 23;
    pub const TRINPROG: u32 = 1 << 7;
    pub const DEVICEEN: u32 = 1 << 6;
    pub const ADDRINC_MASK: u32 = 0x3 << 4;
    pub const SIZE_MASK: u32 = 0x7;

    // AHB3/AHB5: HPROT[4:0] plus master type and the non-secure bit.
    pub const AHB_HPROT_MASK: u32 = 0x1f << 24;
    pub const AHB_HPROT_DATA: u32 = 1 << 24;
    pub const AHB_HPROT_PRIV: u32 = 1 << 25;
    pub const AHB_MASTERTYPE: u32 = 1 << 29;
    pub const AHB_HNONSEC: u32 = 1 << 30;

    // AXI: PROT plus the memory tagging enable.
    pub const AXI3_4_PROT_MASK: u32 = 0x7 << 28;
    pub const AXI5_PROT_MASK: u32 = 0x7f << 24;
    pub const AXI_PROT_NS: u32 = 1 << 29;
    pub const AXI_PROT_PRIV: u32 = 1 << 28;
    pub const AXI_MTE: u32 = 1 << 15;

    // APB4/APB5: PPROT.
    pub const APB_PPROT_MASK: u32 = 0x7 << 28;
    pub const APB_PPROT_NS: u32 = 1 << 29;
    pub const APB_PPROT_PRIV: u32 = 1 << 28;
}

/// BASE register "present" decoding results.
const BASE_FORMAT_ADIV5: u32 = 1 << 1;
const BASE_PRESENT: u32 = 1 << 0;
/// A legacy-format BASE reading all-ones: no debug entries.
const BASE_NOT_PRESENT_LEGACY: u32 = 0xffff_ffff;

/// JEP106 designer codes of parts with known BASE reporting errata.
const DESIGNER_TEXAS: u16 = 0x017;
const DESIGNER_NORDIC: u16 = 0x244;

/// A configured access port.
///
/// Both ADIv5 (`apsel` addressed) and ADIv6 (resource bus addressed) APs
/// share this record; the flavour is carried by the address.
#[derive(Debug, Clone)]
pub struct AccessPort {
    /// The fully qualified address of this AP.
    pub address: FullyQualifiedApAddress,
    /// The AP's IDR value.
    pub idr: Idr,
    /// The validated debug base address.
    pub base_address: u64,
    /// The CSW template with bus-specific prot bits normalised; transfer
    /// size and increment bits are merged in per access.
    pub csw: u32,
    /// The AP supports 64-bit addressing (CFG.LA).
    pub large_address: bool,
    /// The walker found system memory behind this AP (MEMTYPE/DEVID).
    pub has_mem: bool,
}

/// Read an AP's IDR and check it is non-zero.
pub(crate) fn access_port_is_valid<DP>(
    interface: &mut DP,
    access_port: &FullyQualifiedApAddress,
) -> Option<Idr>
where
    DP: DapAccess + ?Sized,
{
    match interface.read_raw_ap_register(access_port, Idr::ADDRESS) {
        Ok(0) => None,
        Ok(raw) => Some(Idr(raw)),
        Err(e) => {
            tracing::debug!("Error reading IDR from AP {:?}: {e}", access_port.ap());
            None
        }
    }
}

/// Validate and configure an AP whose IDR was already read.
///
/// Returns `Ok(None)` for APs that exist but are unusable: not a memory
/// AP, no debug base address, or the AP disabled. These are structural
/// conditions, not errors — the scan continues.
pub(crate) fn configure_ap<DP>(
    interface: &mut DP,
    address: FullyQualifiedApAddress,
    idr: Idr,
) -> Result<Option<AccessPort>, ArmError>
where
    DP: DapAccess + ?Sized,
{
    let class = ApClass::from(idr.class());
    let ap_type = ApType::from(idr.ap_type());
    tracing::debug!("AP {:?}: IDR={:#010x} {class:?} {ap_type:?}", address.ap(), idr.0);

    if class != ApClass::MemAp || matches!(ap_type, ApType::Unknown(_)) {
        // JTAG-APs, COM-APs and unknown designs carry no memory bus; they
        // are kept out of discovery.
        return Ok(None);
    }

    let cfg = interface.read_raw_ap_register(&address, memory_ap::CFG_ADDRESS)?;
    let large_address = cfg & memory_ap::CFG_LARGE_ADDRESS != 0;
    let mut csw = interface.read_raw_ap_register(&address, memory_ap::CSW::ADDRESS)?;
    let mut base = u64::from(interface.read_raw_ap_register(&address, memory_ap::BASE_ADDRESS)?);

    let base_flags = (base as u32) & (BASE_FORMAT_ADIV5 | BASE_PRESENT);
    if large_address {
        // A legacy format BASE with the present bit clear is not a valid
        // LPAE MEM-AP.
        if base_flags == 0 {
            tracing::info!("AP {:?} -> invalid LPAE BASE", address.ap());
            return Ok(None);
        }
        base |= u64::from(interface.read_raw_ap_register(&address, memory_ap::BASE2_ADDRESS)?) << 32;
    }

    let not_present = base_flags == BASE_FORMAT_ADIV5
        || (!large_address && base as u32 == BASE_NOT_PRESENT_LEGACY);
    if not_present {
        // Some parts misreport BASE.P = 0 despite carrying valid debug
        // components. Known offenders, kept as explicit exceptions
        // (verify against current vendor errata sheets before extending):
        //  - TI MSPM0: AP0 reads 0xf0000002
        //  - Nordic: anything but 0x00000002 is in fact present
        let designer = interface.target_designer_code();
        let ignore_not_present = match designer {
            Some(DESIGNER_TEXAS) => base == 0xf000_0002,
            Some(DESIGNER_NORDIC) => base != 0x0000_0002,
            _ => false,
        };
        if !ignore_not_present {
            tracing::info!("AP {:?} -> BASE not present", address.ap());
            return Ok(None);
        }
    }
    // Only the address bits matter from here on.
    let base_address = base & !0xfff;

    if csw & csw::DEVICEEN == 0 {
        tracing::info!("AP {:?} -> disabled", address.ap());
        return Ok(None);
    }

    // Bus-common fixups, then the per-bus prot normalisation.
    csw &= !(csw::SIZE_MASK | csw::ADDRINC_MASK);
    csw |= csw::DBGSWENABLE;
    csw = normalize_csw(csw, ap_type);

    if csw & csw::TRINPROG != 0 {
        tracing::error!(
            "AP {:?}: transaction in progress, AP is not usable",
            address.ap()
        );
        return Err(ArmError::ApTransactionInProgress(address.ap()));
    }

    Ok(Some(AccessPort {
        address,
        idr,
        base_address,
        csw,
        large_address,
        has_mem: false,
    }))
}

/// Normalise the bus-specific CSW prot bits for a MEM-AP type.
fn normalize_csw(mut csw: u32, ap_type: ApType) -> u32 {
    match ap_type {
        ApType::AmbaApb2Apb3 => {
            // No prot modes on APB2/APB3.
        }
        ApType::AmbaAxi3Axi4 => {
            csw &= !(csw::AXI3_4_PROT_MASK | csw::AXI_MTE);
            if csw & csw::SPIDEN != 0 {
                csw &= !csw::AXI_PROT_NS;
            } else {
                csw |= csw::AXI_PROT_NS;
            }
            csw |= csw::AXI_PROT_PRIV;
        }
        ApType::AmbaAxi5 => {
            csw &= !(csw::AXI5_PROT_MASK | csw::AXI_MTE);
            if csw & csw::SPIDEN != 0 {
                csw &= !csw::AXI_PROT_NS;
            } else {
                csw |= csw::AXI_PROT_NS;
            }
            csw |= csw::AXI_PROT_PRIV;
        }
        ApType::AmbaAhb3 | ApType::AmbaAhb5 | ApType::AmbaAhb5Hprot => {
            csw &= !csw::AHB_HPROT_MASK;
            // Generate transactions as requested from the AHB-AP, with
            // privileged data requests via HPROT.
            csw |= csw::AHB_MASTERTYPE | csw::AHB_HPROT_DATA | csw::AHB_HPROT_PRIV;
            if csw & csw::SPIDEN != 0 {
                csw &= !csw::AHB_HNONSEC;
            } else {
                csw |= csw::AHB_HNONSEC;
            }
        }
        ApType::AmbaApb4Apb5 => {
            csw &= !csw::APB_PPROT_MASK;
            if csw & csw::SPIDEN != 0 {
                csw &= !csw::APB_PPROT_NS;
            } else {
                csw |= csw::APB_PPROT_NS;
            }
            csw |= csw::APB_PPROT_PRIV;
        }
        ApType::Unknown(value) => {
            tracing::error!("Unhandled AP type {value}");
        }
    }
    csw
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ahb_csw_normalisation_sets_hprot_and_mastertype() {
        // SPIDEN set: secure accesses allowed, HNONSEC cleared.
        let csw = normalize_csw(csw::SPIDEN | csw::AHB_HNONSEC, ApType::AmbaAhb3);
        assert_eq!(csw & csw::AHB_HNONSEC, 0);
        assert_ne!(csw & csw::AHB_MASTERTYPE, 0);
        assert_ne!(csw & csw::AHB_HPROT_DATA, 0);
        assert_ne!(csw & csw::AHB_HPROT_PRIV, 0);

        // SPIDEN clear: only non-secure accesses.
        let csw = normalize_csw(0, ApType::AmbaAhb5);
        assert_ne!(csw & csw::AHB_HNONSEC, 0);
    }

    #[test]
    fn axi_csw_normalisation_disables_memory_tagging() {
        let csw = normalize_csw(csw::AXI_MTE, ApType::AmbaAxi5);
        assert_eq!(csw & csw::AXI_MTE, 0);
        assert_ne!(csw & csw::AXI_PROT_PRIV, 0);
        assert_ne!(csw & csw::AXI_PROT_NS, 0);
    }

    #[test]
    fn apb2_csw_is_left_untouched() {
        assert_eq!(normalize_csw(0, ApType::AmbaApb2Apb3), 0);
    }
}
