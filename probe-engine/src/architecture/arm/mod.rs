//! ARM Debug Interface (ADIv5/ADIv6) support.

pub mod ap;
pub mod communication_interface;
pub mod component;
pub mod core;
pub mod dp;
pub mod romtable;

pub use communication_interface::ArmCommunicationInterface;

use crate::probe::DebugProbeError;
use romtable::RomTableError;

/// The address of a debug port on the wire.
///
/// Classic SWD and JTAG connect to exactly one DP; multi-drop SWD (DPv2+)
/// addresses one of several DPs sharing the wire by its TARGETSEL value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DpAddress {
    /// The single DP on a non multi-drop wire.
    Default,
    /// A multi-drop DP, selected by its TARGETSEL value.
    Multidrop(u32),
}

/// The address of an access port, as seen from its debug port.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApAddress {
    /// ADIv5 access ports are addressed by the 8-bit APSEL field.
    V1(u8),
    /// ADIv6 access ports live at a 64-bit address on the DP resource bus.
    V2(u64),
}

/// A fully qualified access port address: the DP it belongs to plus the
/// AP's address on that DP.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FullyQualifiedApAddress {
    dp: DpAddress,
    ap: ApAddress,
}

impl FullyQualifiedApAddress {
    /// Create an ADIv5 AP address on the given DP.
    pub const fn v1_with_dp(dp: DpAddress, ap: u8) -> Self {
        Self {
            dp,
            ap: ApAddress::V1(ap),
        }
    }

    /// Create an ADIv6 AP address on the given DP.
    pub const fn v2_with_dp(dp: DpAddress, ap: u64) -> Self {
        Self {
            dp,
            ap: ApAddress::V2(ap),
        }
    }

    /// The debug port this AP belongs to.
    pub fn dp(&self) -> DpAddress {
        self.dp
    }

    /// The AP's address on its debug port.
    pub fn ap(&self) -> ApAddress {
        self.ap
    }
}

/// A typed 32-bit hardware register.
pub trait Register: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// The register's byte address within its bank.
    const ADDRESS: u8;
    /// The register's name.
    const NAME: &'static str;
}

/// Errors of the ARM debug stack.
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    /// An error with the probe transport occurred.
    #[error("An error with the usage of the probe occurred")]
    Probe(#[from] DebugProbeError),
    /// A second consecutive no-response after protocol recovery. Fatal for
    /// the whole probe attempt.
    #[error("SWD invalid ACK")]
    SwdInvalidAck,
    /// Reading the DPIDR failed; no usable DP was found on the wire.
    #[error("No usable DP: reading DPIDR failed")]
    NoUsableDp,
    /// A bounded wait expired.
    #[error("Operation timed out")]
    Timeout,
    /// The operation requires a halted core.
    #[error("The core is running but the operation requires it to be halted")]
    CoreNotHalted,
    /// A data abort was raised during instruction-injected memory access.
    #[error("A data abort occurred")]
    DataAbort,
    /// The address is outside the 32-bit range of this AP or core.
    #[error("Address {0:#x} is out of range for this access port")]
    OutOfBounds(u64),
    /// Breakpoints on this core cannot be placed at the given address.
    #[error("Unsupported breakpoint address {0:#010x}")]
    UnsupportedBreakpointAddress(u64),
    /// The AP reported a transaction in progress and is unusable.
    #[error("AP {0:?} reports a transaction in progress and is not usable")]
    ApTransactionInProgress(ApAddress),
    /// An error during ROM table discovery.
    #[error("Error during CoreSight discovery")]
    RomTable(#[from] RomTableError),
    /// Some other ARM specific error.
    #[error("{0}")]
    Other(String),
}

/// Memory access through an ARM memory access port or core.
///
/// This is the crate-internal contract the CoreSight walker and the core
/// drivers are written against; [`crate::MemoryInterface`] is the public
/// surface built on top of it.
pub trait ArmMemoryInterface {
    /// Read a 32-bit word.
    fn read_word_32(&mut self, address: u64) -> Result<u32, ArmError>;

    /// Read a 16-bit half-word.
    fn read_word_16(&mut self, address: u64) -> Result<u16, ArmError>;

    /// Read a byte.
    fn read_word_8(&mut self, address: u64) -> Result<u8, ArmError>;

    /// Read a block of 32-bit words.
    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError>;

    /// Read a block of bytes.
    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ArmError>;

    /// Write a 32-bit word.
    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), ArmError>;

    /// Write a 16-bit half-word.
    fn write_word_16(&mut self, address: u64, data: u16) -> Result<(), ArmError>;

    /// Write a byte.
    fn write_word_8(&mut self, address: u64, data: u8) -> Result<(), ArmError>;

    /// Write a block of 32-bit words.
    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ArmError>;

    /// Write a block of bytes.
    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), ArmError>;
}
