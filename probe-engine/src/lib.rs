//! # probe-engine
//!
//! The protocol engine of an on-chip debugging probe.
//!
//! This crate implements the pieces of a debug probe that live between the
//! raw wire protocol and a host debugger:
//!
//! - the ARM Debug Interface (ADIv5/ADIv6) Debug Port and Access Port
//!   register layer, including sticky-error recovery,
//! - recursive CoreSight ROM table discovery and component identification,
//! - halt/resume/breakpoint/watchpoint run control for Cortex-M and
//!   Cortex-A/R cores,
//! - the RISC-V Debug Module Interface: Debug Module and Hart discovery,
//!   abstract command and system bus access, and trigger-unit breakpoints.
//!
//! The physical SWD/JTAG layer is *not* part of this crate. It is injected
//! through the [`probe::DapTransport`] and
//! [`architecture::riscv::communication_interface::DmiTransport`] traits,
//! and everything discovered is exposed as [`Target`] handles which a GDB
//! server or flash loader can drive.
//!
//! Start with [`Session::attach_arm`] or [`Session::attach_riscv`].

#![warn(missing_docs)]

pub mod architecture;
pub mod core;
mod error;
pub mod memory;
pub mod probe;
mod session;

pub use crate::core::{
    Architecture, BreakWatch, BreakWatchKind, CoreInterface, CoreStatus, HaltReason, RegisterId,
    Target,
};
pub use crate::error::Error;
pub use crate::memory::MemoryInterface;
pub use crate::session::Session;
