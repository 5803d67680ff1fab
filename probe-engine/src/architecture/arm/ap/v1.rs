//! ADIv5 access port discovery: the banked APSEL scan.

use super::super::communication_interface::DapAccess;
use super::super::{ArmError, DpAddress, FullyQualifiedApAddress};
use super::{configure_ap, AccessPort};

/// Stop the scan after this many consecutive APSEL values with an invalid
/// (zero) IDR. Bounds probing on silicon whose AP space does not read as
/// zero past the last implemented AP.
const MAX_INVALID_IDR_READS: u32 = 8;

/// Enumerate and configure the access ports of an ADIv5 debug port.
///
/// Iterates APSEL 0..=255, stopping after [`MAX_INVALID_IDR_READS`]
/// consecutive invalid IDRs. Buggy silicon that echoes one AP's registers
/// at every APSEL is detected by comparing each AP's (IDR, BASE, CSW)
/// against AP 0's; on a match the duplicated-AP quirk is flagged through
/// `on_duplicate` and the scan is aborted keeping only AP 0, since every
/// further read would be the same echo.
#[tracing::instrument(skip(interface, on_duplicate))]
pub(crate) fn scan_access_ports<DP>(
    interface: &mut DP,
    dp: DpAddress,
    mut on_duplicate: impl FnMut(),
) -> Result<Vec<AccessPort>, ArmError>
where
    DP: DapAccess + ?Sized,
{
    let mut access_ports: Vec<AccessPort> = Vec::new();
    let mut invalid_reads = 0;

    for apsel in 0..=255u8 {
        let address = FullyQualifiedApAddress::v1_with_dp(dp, apsel);
        // Only a zero IDR counts towards the termination limit; APs that
        // exist but are useless reset the run.
        let Some(idr) = super::access_port_is_valid(interface, &address) else {
            invalid_reads += 1;
            if invalid_reads == MAX_INVALID_IDR_READS {
                tracing::debug!(
                    "{MAX_INVALID_IDR_READS} consecutive invalid IDRs, stopping AP scan at APSEL {apsel}"
                );
                break;
            }
            continue;
        };
        invalid_reads = 0;

        let ap = match configure_ap(interface, address, idr) {
            Ok(ap) => ap,
            Err(ArmError::ApTransactionInProgress(_)) => {
                // Structural: this AP is wedged, but its neighbours may be
                // fine. Keep scanning.
                continue;
            }
            Err(other) => return Err(other),
        };
        let Some(ap) = ap else { continue };

        if apsel > 0 {
            if let Some(first) = access_ports.first() {
                if first.idr == ap.idr
                    && first.base_address == ap.base_address
                    && first.csw == ap.csw
                {
                    tracing::warn!(
                        "APSEL {apsel} echoes AP 0's registers, assuming a duplicated-AP part and aborting the scan"
                    );
                    on_duplicate();
                    break;
                }
            }
        }

        access_ports.push(ap);
    }

    Ok(access_ports)
}

#[cfg(test)]
mod test {
    use super::super::super::dp::{DebugPortVersion, DpBankSel};
    use super::super::memory_ap;
    use super::super::Idr;
    use super::*;
    use crate::architecture::arm::ApAddress;
    use crate::architecture::arm::Register;
    use std::collections::HashMap;

    /// A mock DP with a programmable AP register space.
    struct FakeDp {
        /// (apsel, register address) -> value.
        registers: HashMap<(u8, u8), u32>,
        idr_reads: Vec<u8>,
    }

    impl FakeDp {
        fn new() -> Self {
            Self {
                registers: HashMap::new(),
                idr_reads: Vec::new(),
            }
        }

        /// Install a minimal valid memory AP at the given APSEL.
        fn add_memory_ap(&mut self, apsel: u8, base: u32) {
            // An ARM designed AHB3 MEM-AP IDR: class 0x8, type 0x1.
            self.registers.insert((apsel, Idr::ADDRESS), 0x0877_0001);
            self.registers.insert((apsel, memory_ap::CFG_ADDRESS), 0);
            self.registers
                .insert((apsel, memory_ap::CSW::ADDRESS), 1 << 6);
            self.registers
                .insert((apsel, memory_ap::BASE_ADDRESS), base | 0b11);
        }
    }

    impl DapAccess for FakeDp {
        fn read_raw_dp_register(&mut self, _addr: u8, _bank: DpBankSel) -> Result<u32, ArmError> {
            Ok(0)
        }

        fn write_raw_dp_register(
            &mut self,
            _addr: u8,
            _bank: DpBankSel,
            _value: u32,
        ) -> Result<(), ArmError> {
            Ok(())
        }

        fn read_raw_ap_register(
            &mut self,
            ap: &FullyQualifiedApAddress,
            addr: u8,
        ) -> Result<u32, ArmError> {
            let ApAddress::V1(apsel) = ap.ap() else {
                panic!("v1 scan read a v2 address")
            };
            if addr == Idr::ADDRESS {
                self.idr_reads.push(apsel);
            }
            Ok(*self.registers.get(&(apsel, addr)).unwrap_or(&0))
        }

        fn write_raw_ap_register(
            &mut self,
            _ap: &FullyQualifiedApAddress,
            _addr: u8,
            _value: u32,
        ) -> Result<(), ArmError> {
            Ok(())
        }

        fn debug_port_version(&self) -> DebugPortVersion {
            DebugPortVersion::DPv1
        }
    }

    #[test]
    fn scan_stops_after_eight_consecutive_invalid_idrs() {
        let mut dp = FakeDp::new();
        dp.add_memory_ap(0, 0xe00f_f000);

        let aps = scan_access_ports(&mut dp, DpAddress::Default, || ()).unwrap();
        assert_eq!(aps.len(), 1);

        // APSEL 0 is probed, then exactly 8 invalid APSELs before giving up.
        let highest = *dp.idr_reads.iter().max().unwrap();
        assert_eq!(highest, 8);
    }

    #[test]
    fn invalid_run_is_reset_by_a_valid_ap() {
        let mut dp = FakeDp::new();
        dp.add_memory_ap(0, 0xe00f_f000);
        dp.add_memory_ap(5, 0xf000_0000);

        let aps = scan_access_ports(&mut dp, DpAddress::Default, || ()).unwrap();
        assert_eq!(aps.len(), 2);
        // The run of invalid reads restarts after APSEL 5.
        assert_eq!(*dp.idr_reads.iter().max().unwrap(), 13);
    }

    #[test]
    fn duplicated_ap_aborts_the_scan() {
        let mut dp = FakeDp::new();
        // Every APSEL echoes the same registers.
        for apsel in 0..=255 {
            dp.add_memory_ap(apsel, 0xe00f_f000);
        }

        let mut flagged = false;
        let aps = scan_access_ports(&mut dp, DpAddress::Default, || flagged = true).unwrap();

        assert!(flagged);
        assert_eq!(aps.len(), 1, "only AP 0 must survive a duplicated-AP part");
        assert_eq!(*dp.idr_reads.iter().max().unwrap(), 1);
    }
}
