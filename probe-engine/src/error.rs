use crate::architecture::{arm::ArmError, riscv::RiscvError};
use crate::probe::DebugProbeError;
use thiserror::Error;

/// The top-level error type of this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// An error with the usage of the probe transport occurred.
    #[error("An error with the usage of the probe occurred")]
    Probe(#[from] DebugProbeError),
    /// An ARM specific error occurred.
    #[error("An ARM specific error occurred")]
    Arm(#[from] ArmError),
    /// A RISC-V specific error occurred.
    #[error("A RISC-V specific error occurred")]
    Riscv(#[from] RiscvError),
    /// The operation requires the core to be halted.
    #[error("The core is running but the operation requires it to be halted")]
    CoreNotHalted,
    /// The requested core register does not exist.
    #[error("Register {0} is not valid for this core")]
    InvalidRegister(u16),
    /// All matching hardware breakpoint or watchpoint units are in use.
    #[error("No free hardware breakpoint/watchpoint unit is available")]
    NoFreeBreakwatchUnit,
    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
