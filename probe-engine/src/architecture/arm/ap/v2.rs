//! ADIv6 access port discovery.
//!
//! An ADIv6 DP does not enumerate APs through APSEL. Instead the DP
//! advertises a single 64-bit root address on its resource bus (BASEPTR0/1)
//! and discovery walks the ROM table found there; every MEM-APv2 component
//! in the walk becomes an access port at its resource bus address.

use super::super::communication_interface::DapAccess;
use super::super::{
    ArmCommunicationInterface, ArmError, ArmMemoryInterface, DpAddress, FullyQualifiedApAddress,
};
use super::{configure_ap, AccessPort};

/// Memory access over the bare DP resource bus.
///
/// Used for the root ROM table walk of an ADIv6 DP, before any access port
/// exists to route through. Only word access is meaningful on this bus;
/// narrow reads are served from the containing word.
#[derive(Debug, Clone)]
pub struct RootMemoryInterface {
    interface: ArmCommunicationInterface,
}

impl RootMemoryInterface {
    /// Wrap the DP handle for root resource access.
    pub fn new(interface: ArmCommunicationInterface) -> Self {
        Self { interface }
    }
}

impl ArmMemoryInterface for RootMemoryInterface {
    fn read_word_32(&mut self, address: u64) -> Result<u32, ArmError> {
        self.interface.read_resource_word(address)
    }

    fn read_word_16(&mut self, address: u64) -> Result<u16, ArmError> {
        let word = self.read_word_32(address & !3)?;
        Ok((word >> ((address & 2) * 8)) as u16)
    }

    fn read_word_8(&mut self, address: u64) -> Result<u8, ArmError> {
        let word = self.read_word_32(address & !3)?;
        Ok((word >> ((address & 3) * 8)) as u8)
    }

    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError> {
        for (index, word) in data.iter_mut().enumerate() {
            *word = self.read_word_32(address + index as u64 * 4)?;
        }
        Ok(())
    }

    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ArmError> {
        for (index, byte) in data.iter_mut().enumerate() {
            *byte = self.read_word_8(address + index as u64)?;
        }
        Ok(())
    }

    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), ArmError> {
        self.interface.write_resource_word(address, data)
    }

    fn write_word_16(&mut self, _address: u64, _data: u16) -> Result<(), ArmError> {
        Err(ArmError::Other(
            "The DP resource bus only supports word writes".into(),
        ))
    }

    fn write_word_8(&mut self, _address: u64, _data: u8) -> Result<(), ArmError> {
        Err(ArmError::Other(
            "The DP resource bus only supports word writes".into(),
        ))
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ArmError> {
        for (index, word) in data.iter().enumerate() {
            self.write_word_32(address + index as u64 * 4, *word)?;
        }
        Ok(())
    }

    fn write_8(&mut self, _address: u64, _data: &[u8]) -> Result<(), ArmError> {
        Err(ArmError::Other(
            "The DP resource bus only supports word writes".into(),
        ))
    }
}

/// Instantiate and configure the MEM-APv2 found at `resource_address`
/// during a root ROM table walk.
///
/// Returns `Ok(None)` when nothing usable answers at that address; the
/// walker abandons the entry and carries on.
pub(crate) fn access_port_at<DP>(
    interface: &mut DP,
    dp: DpAddress,
    resource_address: u64,
) -> Result<Option<AccessPort>, ArmError>
where
    DP: DapAccess + ?Sized,
{
    let address = FullyQualifiedApAddress::v2_with_dp(dp, resource_address);
    let Some(idr) = super::access_port_is_valid(interface, &address) else {
        tracing::debug!("No AP answers at resource address {resource_address:#x}");
        return Ok(None);
    };
    match configure_ap(interface, address, idr) {
        Ok(ap) => Ok(ap),
        Err(ArmError::ApTransactionInProgress(_)) => Ok(None),
        Err(other) => Err(other),
    }
}
