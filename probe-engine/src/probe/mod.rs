//! The injected wire-transport capability.
//!
//! A probe driver (CMSIS-DAP, bit-banged SWD, FTDI JTAG, ...) implements
//! [`DapTransport`] and hands it to [`crate::Session::attach_arm`]. The
//! engine never touches pins itself; everything below the register-transfer
//! level lives behind this trait.

use thiserror::Error;

/// Whether a raw register transfer addresses the DP or the currently
/// selected AP register bank.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PortType {
    /// Transfer addresses a Debug Port register.
    DebugPort,
    /// Transfer addresses an Access Port register (through DP SELECT).
    AccessPort,
}

/// Acknowledgement codes of a single wire transfer.
///
/// These are the SWD three-bit ACK values; the JTAG-DP driver maps its
/// equivalent responses onto the same set.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Transfer accepted.
    Ok,
    /// Target requests a retry.
    Wait,
    /// Target signalled a (sticky) fault.
    Fault,
    /// No response at all; the line read as all-ones.
    NoResponse,
}

/// Protocol-level errors between probe and target.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DapError {
    /// An error occurred in the SWD communication between probe and device.
    #[error("An error occurred in the SWD communication between probe and device")]
    SwdProtocol,
    /// Target device did not respond to the request.
    #[error("Target device did not respond to request")]
    NoAcknowledge,
    /// Target device responded with a FAULT response.
    #[error("Target device responded with FAULT response to request")]
    FaultResponse,
    /// Target device responded with a WAIT response too many times.
    #[error("Target device responded with WAIT response to request")]
    WaitResponse,
    /// Target power-up handshake failed.
    #[error("Target power-up failed")]
    TargetPowerUpFailed,
    /// Incorrect parity on a read transfer.
    #[error("Incorrect parity on READ request")]
    IncorrectParity,
}

impl From<Ack> for DapError {
    fn from(ack: Ack) -> Self {
        match ack {
            Ack::Ok => DapError::SwdProtocol,
            Ack::Wait => DapError::WaitResponse,
            Ack::Fault => DapError::FaultResponse,
            Ack::NoResponse => DapError::NoAcknowledge,
        }
    }
}

/// Errors of the probe transport itself.
#[derive(Debug, Error)]
pub enum DebugProbeError {
    /// A bounded wait expired.
    #[error("Operation timed out")]
    Timeout,
    /// A wire-protocol error occurred.
    #[error("An error occurred in the communication with the target")]
    Dap(#[from] DapError),
    /// The transport does not implement the requested primitive.
    #[error("The transport does not implement {function_name}")]
    NotImplemented {
        /// Name of the unimplemented primitive.
        function_name: &'static str,
    },
    /// A driver specific error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Raw DP/AP register access as provided by a probe driver.
///
/// All transfers are 32 bit wide and addressed with the register's byte
/// offset within the selected four-register bank; bank selection via the DP
/// SELECT register is the engine's job, not the driver's.
///
/// Drivers report failed transfers as [`DebugProbeError::Dap`] carrying the
/// acknowledgement that was received; the engine performs protocol recovery
/// on top of that (see `low_access` in the ARM communication interface).
pub trait DapTransport {
    /// Read a 32-bit register from the given port.
    fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, DebugProbeError>;

    /// Write a 32-bit register on the given port.
    fn raw_write_register(
        &mut self,
        port: PortType,
        addr: u8,
        value: u32,
    ) -> Result<(), DebugProbeError>;

    /// Write a DP register without checking the acknowledgement.
    ///
    /// Required for multi-drop SWD: TARGETSEL is written while every device
    /// on the wire is deselected and none of them drives the ACK phase.
    fn raw_write_no_ack(&mut self, _addr: u8, _value: u32) -> Result<(), DebugProbeError> {
        Err(DebugProbeError::NotImplemented {
            function_name: "raw_write_no_ack",
        })
    }

    /// Clock out a raw bit sequence on SWDIO/TMS.
    ///
    /// Used for line resets, dormant-state sequences and to flush the
    /// turnaround period during protocol recovery.
    fn swj_sequence(&mut self, bit_len: u8, bits: u64) -> Result<(), DebugProbeError>;

    /// Write the DP ABORT register, bypassing any transfer batching.
    ///
    /// This is the escape hatch used when normal register writes are no
    /// longer acknowledged.
    fn raw_abort(&mut self, bits: u32) -> Result<(), DebugProbeError> {
        self.raw_write_register(PortType::DebugPort, 0x0, bits)
    }

    /// Flush any batched transfers to the wire.
    fn raw_flush(&mut self) -> Result<(), DebugProbeError> {
        Ok(())
    }
}
