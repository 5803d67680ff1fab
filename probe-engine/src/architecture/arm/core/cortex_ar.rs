//! Run control for Cortex-A and Cortex-R cores.
//!
//! These cores expose a memory mapped debug register file (located through
//! the ROM table walk) but no architected path to the register file or
//! system memory: everything goes through instruction injection via DBGITR
//! with data moved through the DCC. The register file is saved wholesale on
//! halt and restored on resume, so injected work may clobber freely.

use super::super::communication_interface::ADI_TIMEOUT;
use super::super::{ArmError, ArmMemoryInterface};
use super::instructions::{
    build_ldc, build_ldrb_postinc, build_ldrh_postinc, build_mcr, build_mov, build_mrc, build_mrs,
    build_msr, build_stc, build_strb_postinc, build_strh_postinc,
};
use crate::core::{
    Architecture, BreakWatch, BreakWatchKind, BreakwatchAllocator, CoreInterface, CoreStatus,
    HaltReason, RegisterId,
};
use crate::error::Error;
use crate::memory::MemoryInterface;
use crate::probe::DebugProbeError;
use bitfield::bitfield;
use std::time::Instant;

// Debug register offsets from the debug base address.
const DBG_DIDR: u64 = 0x000;
const DBG_DTRRX: u64 = 0x080;
const DBG_ITR: u64 = 0x084;
const DBG_DSCR: u64 = 0x088;
const DBG_DTRTX: u64 = 0x08C;
const DBG_DRCR: u64 = 0x090;
const DBG_BVR_BASE: u64 = 0x100;
const DBG_BCR_BASE: u64 = 0x140;
const DBG_WVR_BASE: u64 = 0x180;
const DBG_WCR_BASE: u64 = 0x1C0;
const DBG_OSLAR: u64 = 0x300;
const DBG_OSLSR: u64 = 0x304;

bitfield! {
    /// The Debug ID Register: comparator counts and debug version.
    #[derive(Copy, Clone)]
    pub struct Dbgdidr(u32);
    impl Debug;
    /// Number of watchpoint register pairs, minus one.
    pub u8, wrps, _: 31, 28;
    /// Number of breakpoint register pairs, minus one.
    pub u8, brps, _: 27, 24;
    /// Debug architecture version.
    pub u8, version, _: 19, 16;
}

impl From<u32> for Dbgdidr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgdidr> for u32 {
    fn from(value: Dbgdidr) -> Self {
        value.0
    }
}

bitfield! {
    /// The Debug Status and Control Register.
    #[derive(Copy, Clone)]
    pub struct Dbgdscr(u32);
    impl Debug;
    /// DBGDTRRX holds data the core has not consumed yet.
    pub rxfull, _: 30;
    /// DBGDTRTX holds data for the debugger to read.
    pub txfull, _: 29;
    /// The injected instruction has completed.
    pub instrcompl, _: 24;
    /// DCC access mode (0 = non-blocking, 1 = stall, 2 = fast).
    pub u8, ext_dcc_mode, set_ext_dcc_mode: 21, 20;
    /// Halting debug enabled.
    pub hdbgen, set_hdbgen: 14;
    /// Instruction injection through DBGITR enabled.
    pub itren, set_itren: 13;
    /// Mask interrupts while stepping.
    pub intdis, set_intdis: 11;
    /// A sticky synchronous data abort was raised by an injected access.
    pub sdabort, _: 6;
    /// Method-of-entry: why the core halted.
    pub u8, moe, _: 5, 2;
    /// The core has restarted after a resume request.
    pub restarted, _: 1;
    /// The core is halted in debug state.
    pub halted, _: 0;
}

impl From<u32> for Dbgdscr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dbgdscr> for u32 {
    fn from(value: Dbgdscr) -> Self {
        value.0
    }
}

// Method-of-entry values.
const MOE_HALT_REQUEST: u8 = 0b0000;
const MOE_BREAKPOINT: u8 = 0b0001;
const MOE_ASYNC_WATCH: u8 = 0b0010;
const MOE_BKPT_INSN: u8 = 0b0011;
const MOE_EXTERNAL_DBG: u8 = 0b0100;
const MOE_VEC_CATCH: u8 = 0b0101;
const MOE_SYNC_WATCH: u8 = 0b1010;

// DBGDRCR bits.
const DRCR_HALT_REQ: u32 = 1 << 0;
const DRCR_RESTART_REQ: u32 = 1 << 1;
const DRCR_CLEAR_STICKY_EXC: u32 = 1 << 2;

// DBGOSLSR: the OS lock is set.
const OSLSR_OSLK: u32 = 1 << 1;

// DBGBCR fields.
const BCR_ENABLE: u32 = 1 << 0;
/// Match in privileged and user mode, secure and non-secure.
const BCR_ALL_MODES: u32 = (0b11 << 1) | (1 << 13);
const BCR_BAS_ANY: u32 = 0b1111 << 5;
const BCR_BAS_LOW_HALF: u32 = 0b0011 << 5;
const BCR_BAS_HIGH_HALF: u32 = 0b1100 << 5;
/// Breakpoint type: unlinked instruction address mismatch.
const BCR_TYPE_MISMATCH: u32 = 0b0100 << 20;

// DBGWCR fields.
const WCR_ENABLE: u32 = 1 << 0;
const WCR_ALL_MODES: u32 = (0b11 << 1) | (1 << 13);
const WCR_MATCH_ON_LOAD: u32 = 0b01 << 3;
const WCR_MATCH_ON_STORE: u32 = 0b10 << 3;
const WCR_MATCH_ANY_ACCESS: u32 = 0b11 << 3;
const WCR_BAS_SHIFT: u32 = 5;

// CP15 registers reached by instruction injection.
/// Data Fault Status Register: `MRC p15, 0, <Rt>, c5, c0, 0`.
const CP15_DFSR: (u8, u8, u8) = (5, 0, 0);
/// Data Fault Address Register: `MRC p15, 0, <Rt>, c6, c0, 0`.
const CP15_DFAR: (u8, u8, u8) = (6, 0, 0);

/// CPSR Thumb state bit.
const CPSR_THUMB: u32 = 1 << 5;

/// Instruction cache invalidate all: `MCR p15, 0, <Rt>, c7, c5, 0`.
const CP15_ICIALLU: (u8, u8, u8) = (7, 5, 0);

/// Runs of at least this many whole words use the DCC fast mode, which
/// re-issues the transfer instruction on every DCC access instead of one
/// DBGITR write per word.
const FAST_MODE_THRESHOLD: usize = 3;

/// The saved register file of a halted core.
#[derive(Debug, Clone, Default)]
struct CoreRegisterFile {
    r: [u32; 16],
    cpsr: u32,
}

/// Which Cortex flavour this driver fronts; Cortex-R skips the virtual
/// memory handling.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CortexArFamily {
    /// Cortex-A.
    CortexA,
    /// Cortex-R.
    CortexR,
}

/// A Cortex-A/R core attached through its memory AP.
pub struct CortexAR {
    memory: Box<dyn ArmMemoryInterface>,
    base: u64,
    family: CortexArFamily,
    status: CoreStatus,
    step_armed: bool,
    regs: CoreRegisterFile,
    /// Breakpoint allocator over the hardware slots minus the one reserved
    /// for single-step emulation.
    breakpoints: BreakwatchAllocator,
    /// The reserved slot's index.
    step_slot: usize,
    watchpoints: BreakwatchAllocator,
    watch_addresses: Vec<Option<u64>>,
    /// Per-call data abort latch, consumed by `check_error`.
    fault_latch: bool,
}

/// Classify a halt from the method-of-entry field.
///
/// `active_watchpoints` are the addresses of the armed watchpoint units:
/// with exactly one armed unit a watchpoint halt carries its address, with
/// several the source cannot be disambiguated and the halt degrades to a
/// breakpoint report.
fn classify_halt(moe: u8, active_watchpoints: &[u64], step_armed: bool) -> HaltReason {
    match moe {
        MOE_HALT_REQUEST if step_armed => HaltReason::Step,
        MOE_HALT_REQUEST => HaltReason::Request,
        MOE_BREAKPOINT | MOE_BKPT_INSN | MOE_EXTERNAL_DBG | MOE_VEC_CATCH => {
            if step_armed {
                HaltReason::Step
            } else {
                HaltReason::Breakpoint
            }
        }
        MOE_SYNC_WATCH | MOE_ASYNC_WATCH => match active_watchpoints {
            [address] => HaltReason::Watchpoint(Some(*address)),
            [] => HaltReason::Watchpoint(None),
            _ => HaltReason::Breakpoint,
        },
        _ => HaltReason::Fault,
    }
}

impl CortexAR {
    /// Attach to the Cortex-A/R debug unit at `base`.
    ///
    /// Reads the comparator counts once and reserves the last breakpoint
    /// slot for single-step emulation.
    pub fn new(
        mut memory: Box<dyn ArmMemoryInterface>,
        base: u64,
        family: CortexArFamily,
    ) -> Result<Self, ArmError> {
        let didr = Dbgdidr(memory.read_word_32(base + DBG_DIDR)?);
        let breakpoint_count = u32::from(didr.brps()) + 1;
        let watchpoint_count = u32::from(didr.wrps()) + 1;
        tracing::debug!(
            "Cortex-{}: {breakpoint_count} breakpoints, {watchpoint_count} watchpoints",
            if family == CortexArFamily::CortexA { "A" } else { "R" },
        );

        let dscr = Dbgdscr(memory.read_word_32(base + DBG_DSCR)?);
        let status = if dscr.halted() {
            CoreStatus::Halted(HaltReason::Request)
        } else {
            CoreStatus::Running
        };

        Ok(Self {
            memory,
            base,
            family,
            status,
            step_armed: false,
            regs: CoreRegisterFile::default(),
            // The last slot is never handed out; it implements stepping.
            breakpoints: BreakwatchAllocator::new(breakpoint_count.saturating_sub(1)),
            step_slot: breakpoint_count.saturating_sub(1) as usize,
            watchpoints: BreakwatchAllocator::new(watchpoint_count),
            watch_addresses: vec![None; watchpoint_count as usize],
            fault_latch: false,
        })
    }

    fn read_dscr(&mut self) -> Result<Dbgdscr, ArmError> {
        Ok(Dbgdscr(self.memory.read_word_32(self.base + DBG_DSCR)?))
    }

    fn write_dscr(&mut self, dscr: Dbgdscr) -> Result<(), ArmError> {
        self.memory.write_word_32(self.base + DBG_DSCR, dscr.into())
    }

    /// Clear the OS lock if it is set.
    ///
    /// A lock that will not clear is reported but tolerated: the core may
    /// simply be unpowered and will be picked up on a later poll.
    fn unlock_os_lock(&mut self) -> Result<(), ArmError> {
        let oslsr = self.memory.read_word_32(self.base + DBG_OSLSR)?;
        if oslsr & OSLSR_OSLK != 0 {
            self.memory.write_word_32(self.base + DBG_OSLAR, 0)?;
            let oslsr = self.memory.read_word_32(self.base + DBG_OSLSR)?;
            if oslsr & OSLSR_OSLK != 0 {
                tracing::warn!("OS lock is stuck set; the core may be unpowered");
            }
        }
        Ok(())
    }

    /// Inject one instruction and wait for it to complete.
    fn run_insn(&mut self, insn: u32) -> Result<(), ArmError> {
        self.memory.write_word_32(self.base + DBG_ITR, insn)?;
        let start = Instant::now();
        loop {
            let dscr = self.read_dscr()?;
            if dscr.sdabort() {
                self.clear_sticky_abort()?;
                return Err(ArmError::DataAbort);
            }
            if dscr.instrcompl() {
                return Ok(());
            }
            if start.elapsed() >= ADI_TIMEOUT {
                return Err(ArmError::Timeout);
            }
        }
    }

    /// Inject an instruction whose result lands in DBGDTRTX.
    fn run_read_insn(&mut self, insn: u32) -> Result<u32, ArmError> {
        self.memory.write_word_32(self.base + DBG_ITR, insn)?;
        let start = Instant::now();
        loop {
            let dscr = self.read_dscr()?;
            if dscr.sdabort() {
                self.clear_sticky_abort()?;
                return Err(ArmError::DataAbort);
            }
            if dscr.instrcompl() && dscr.txfull() {
                return self.memory.read_word_32(self.base + DBG_DTRTX);
            }
            if start.elapsed() >= ADI_TIMEOUT {
                return Err(ArmError::Timeout);
            }
        }
    }

    /// Feed a value through DBGDTRRX into an injected instruction.
    fn run_write_insn(&mut self, insn: u32, value: u32) -> Result<(), ArmError> {
        self.memory.write_word_32(self.base + DBG_DTRRX, value)?;
        let start = Instant::now();
        // Wait for the value to latch.
        while !self.read_dscr()?.rxfull() {
            if start.elapsed() >= ADI_TIMEOUT {
                return Err(ArmError::Timeout);
            }
        }
        self.memory.write_word_32(self.base + DBG_ITR, insn)?;
        loop {
            let dscr = self.read_dscr()?;
            if dscr.sdabort() {
                self.clear_sticky_abort()?;
                return Err(ArmError::DataAbort);
            }
            // Complete once the core consumed the value and retired.
            if dscr.instrcompl() && !dscr.rxfull() {
                return Ok(());
            }
            if start.elapsed() >= ADI_TIMEOUT {
                return Err(ArmError::Timeout);
            }
        }
    }

    fn clear_sticky_abort(&mut self) -> Result<(), ArmError> {
        self.fault_latch = true;
        self.memory
            .write_word_32(self.base + DBG_DRCR, DRCR_CLEAR_STICKY_EXC)
    }

    /// Read a live core register through the DCC. Clobbers nothing.
    fn core_reg_read(&mut self, reg: u16) -> Result<u32, ArmError> {
        self.run_read_insn(build_mcr(14, 0, reg, 0, 5, 0))
    }

    /// Write a live core register through the DCC.
    fn core_reg_write(&mut self, reg: u16, value: u32) -> Result<(), ArmError> {
        self.run_write_insn(build_mrc(14, 0, reg, 0, 5, 0), value)
    }

    /// Read a CP15 register. Clobbers r0.
    fn coproc_read(&mut self, reg: (u8, u8, u8)) -> Result<u32, ArmError> {
        let (crn, crm, opc2) = reg;
        self.run_insn(build_mrc(15, 0, 0, crn, crm, opc2))?;
        self.core_reg_read(0)
    }

    /// Write a CP15 register. Clobbers r0.
    fn coproc_write(&mut self, reg: (u8, u8, u8), value: u32) -> Result<(), ArmError> {
        let (crn, crm, opc2) = reg;
        self.core_reg_write(0, value)?;
        self.run_insn(build_mcr(15, 0, 0, crn, crm, opc2))
    }

    /// Save the whole register file; injected operations clobber the live
    /// registers from here on.
    fn save_registers(&mut self) -> Result<(), ArmError> {
        for reg in 0..=14u16 {
            self.regs.r[reg as usize] = self.core_reg_read(reg)?;
        }
        // PC reads as PC + 8 in debug state.
        self.run_insn(build_mov(0, 15))?;
        self.regs.r[15] = self.core_reg_read(0)?.wrapping_sub(8);
        self.run_insn(build_mrs(0))?;
        self.regs.cpsr = self.core_reg_read(0)?;
        Ok(())
    }

    /// Put the saved register file back so the program never notices.
    fn restore_registers(&mut self) -> Result<(), ArmError> {
        let regs = self.regs.clone();
        self.core_reg_write(0, regs.cpsr)?;
        self.run_insn(build_msr(0))?;
        self.core_reg_write(0, regs.r[15])?;
        self.run_insn(build_mov(15, 0))?;
        for reg in (1..=14u16).rev() {
            self.core_reg_write(reg, regs.r[reg as usize])?;
        }
        self.core_reg_write(0, regs.r[0])
    }

    fn config_breakpoint(&mut self, slot: usize, mode: u32, address: u64, thumb: bool) -> Result<(), ArmError> {
        let bas = if thumb {
            if address & 2 != 0 {
                BCR_BAS_HIGH_HALF
            } else {
                BCR_BAS_LOW_HALF
            }
        } else {
            BCR_BAS_ANY
        };
        self.memory
            .write_word_32(self.base + DBG_BVR_BASE + (slot as u64) * 4, address as u32 & !3)?;
        self.memory.write_word_32(
            self.base + DBG_BCR_BASE + (slot as u64) * 4,
            BCR_ENABLE | BCR_ALL_MODES | bas | mode,
        )
    }

    /// Bulk word reads with the address preloaded in r0. Switches the DCC
    /// into fast mode for runs of [`FAST_MODE_THRESHOLD`] words or more,
    /// where every DBGDTRTX read re-issues the load.
    fn read_words_fast(&mut self, dest: &mut [u32]) -> Result<(), ArmError> {
        let insn = build_ldc(14, 5, 0, 4);
        if dest.len() < FAST_MODE_THRESHOLD {
            for word in dest.iter_mut() {
                *word = self.run_read_insn(insn)?;
            }
            return Ok(());
        }

        let mut dscr = self.read_dscr()?;
        dscr.set_ext_dcc_mode(0b10);
        self.write_dscr(dscr)?;
        self.memory.write_word_32(self.base + DBG_ITR, insn)?;

        let count = dest.len();
        let mut failed = false;
        for word in dest[..count - 1].iter_mut() {
            *word = self.memory.read_word_32(self.base + DBG_DTRTX)?;
        }

        // Leave fast mode before draining the final value, then check
        // whether any transfer in the run aborted.
        let mut dscr = self.read_dscr()?;
        dscr.set_ext_dcc_mode(0b00);
        self.write_dscr(dscr)?;
        dest[count - 1] = self.memory.read_word_32(self.base + DBG_DTRTX)?;

        if self.read_dscr()?.sdabort() {
            self.clear_sticky_abort()?;
            failed = true;
        }
        if failed {
            return Err(ArmError::DataAbort);
        }
        Ok(())
    }

    /// Bulk word writes with the address preloaded in r0; fast mode as for
    /// reads, every DBGDTRRX write re-issues the store.
    fn write_words_fast(&mut self, src: &[u32]) -> Result<(), ArmError> {
        let insn = build_stc(14, 5, 0, 4);
        if src.len() < FAST_MODE_THRESHOLD {
            for word in src {
                self.run_write_insn(insn, *word)?;
            }
            return Ok(());
        }

        let mut dscr = self.read_dscr()?;
        dscr.set_ext_dcc_mode(0b10);
        self.write_dscr(dscr)?;
        self.memory.write_word_32(self.base + DBG_ITR, insn)?;

        for word in src {
            self.memory.write_word_32(self.base + DBG_DTRRX, *word)?;
        }

        let mut dscr = self.read_dscr()?;
        dscr.set_ext_dcc_mode(0b00);
        self.write_dscr(dscr)?;

        // Wait for the last store to retire before checking for aborts.
        let start = Instant::now();
        loop {
            let dscr = self.read_dscr()?;
            if dscr.sdabort() {
                self.clear_sticky_abort()?;
                return Err(ArmError::DataAbort);
            }
            if dscr.instrcompl() && !dscr.rxfull() {
                return Ok(());
            }
            if start.elapsed() >= ADI_TIMEOUT {
                return Err(ArmError::Timeout);
            }
        }
    }

    /// Unaligned-capable byte reads; r0 holds the running address, data
    /// passes through r1.
    fn read_bytes_slow(&mut self, mut address: u64, data: &mut [u8]) -> Result<(), ArmError> {
        let mut offset = 0usize;
        if address & 1 != 0 && offset < data.len() {
            self.run_insn(build_ldrb_postinc(1, 0))?;
            data[offset] = self.core_reg_read(1)? as u8;
            offset += 1;
            address += 1;
        }
        if address & 2 != 0 && data.len() - offset >= 2 {
            self.run_insn(build_ldrh_postinc(1, 0))?;
            let half = self.core_reg_read(1)? as u16;
            data[offset..offset + 2].copy_from_slice(&half.to_le_bytes());
            offset += 2;
        }
        let words = (data.len() - offset) / 4;
        if words > 0 {
            let mut buffer = vec![0u32; words];
            self.read_words_fast(&mut buffer)?;
            for word in buffer {
                data[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
                offset += 4;
            }
        }
        let remainder = data.len() - offset;
        if remainder >= 2 {
            self.run_insn(build_ldrh_postinc(1, 0))?;
            let half = self.core_reg_read(1)? as u16;
            data[offset..offset + 2].copy_from_slice(&half.to_le_bytes());
            offset += 2;
        }
        if offset < data.len() {
            self.run_insn(build_ldrb_postinc(1, 0))?;
            data[offset] = self.core_reg_read(1)? as u8;
        }
        Ok(())
    }

    fn write_bytes_slow(&mut self, mut address: u64, data: &[u8]) -> Result<(), ArmError> {
        let mut offset = 0usize;
        if address & 1 != 0 && offset < data.len() {
            self.core_reg_write(1, u32::from(data[offset]))?;
            self.run_insn(build_strb_postinc(1, 0))?;
            offset += 1;
            address += 1;
        }
        if address & 2 != 0 && data.len() - offset >= 2 {
            let half = u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap());
            self.core_reg_write(1, u32::from(half))?;
            self.run_insn(build_strh_postinc(1, 0))?;
            offset += 2;
        }
        let words = (data.len() - offset) / 4;
        if words > 0 {
            let buffer: Vec<u32> = data[offset..offset + words * 4]
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
                .collect();
            self.write_words_fast(&buffer)?;
            offset += words * 4;
        }
        let remainder = data.len() - offset;
        if remainder >= 2 {
            let half = u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap());
            self.core_reg_write(1, u32::from(half))?;
            self.run_insn(build_strh_postinc(1, 0))?;
            offset += 2;
        }
        if offset < data.len() {
            self.core_reg_write(1, u32::from(data[offset]))?;
            self.run_insn(build_strb_postinc(1, 0))?;
        }
        Ok(())
    }

    /// Run one injected memory transfer with the fault bracket around it:
    /// DFSR/DFAR are cached first (debug register traffic perturbs them)
    /// and restored afterwards; an abort marks the call failed in the
    /// per-target latch instead of failing the session.
    fn with_fault_bracket(
        &mut self,
        address: u64,
        op: impl FnOnce(&mut Self) -> Result<(), ArmError>,
    ) -> Result<(), Error> {
        if !self.status.is_halted() {
            return Err(Error::CoreNotHalted);
        }
        let fault_status = self.coproc_read(CP15_DFSR)?;
        let fault_address = self.coproc_read(CP15_DFAR)?;

        // The transfer address rides in r0.
        self.core_reg_write(0, address as u32)?;
        let result = op(self);

        self.coproc_write(CP15_DFAR, fault_address)?;
        self.coproc_write(CP15_DFSR, fault_status)?;

        match result {
            // The abort is latched for `check_error`; the call itself
            // reports success with whatever data made it across.
            Err(ArmError::DataAbort) => {
                tracing::warn!("Data abort during injected memory access at {address:#x}");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    fn active_watchpoints(&self) -> Vec<u64> {
        self.watch_addresses.iter().flatten().copied().collect()
    }
}

impl CoreInterface for CortexAR {
    fn architecture(&self) -> Architecture {
        Architecture::Arm
    }

    fn halt_request(&mut self) -> Result<(), Error> {
        match self
            .memory
            .write_word_32(self.base + DBG_DRCR, DRCR_HALT_REQ)
        {
            Ok(()) => Ok(()),
            Err(ArmError::Probe(DebugProbeError::Timeout)) | Err(ArmError::Timeout) => {
                // A timeout here usually means the core is in WFI; the
                // caller retries the request.
                tracing::warn!("Timeout sending halt request; is the core in WFI?");
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    fn halt_poll(&mut self) -> Result<CoreStatus, Error> {
        let dscr = match self.read_dscr() {
            Ok(dscr) => dscr,
            // A timeout is not a problem: the core is probably in WFI and
            // still running.
            Err(ArmError::Probe(DebugProbeError::Timeout)) | Err(ArmError::Timeout) => {
                return Ok(CoreStatus::Running)
            }
            // Anything else means the DP is gone; this is terminal and the
            // session discards the whole target list.
            Err(fatal) => return Err(fatal.into()),
        };

        if !dscr.halted() {
            self.status = CoreStatus::Running;
            return Ok(self.status);
        }

        if !self.status.is_halted() {
            self.unlock_os_lock()?;

            // Enable instruction injection and halting debug so register
            // access and breakpoints work from here on.
            let mut enable = dscr;
            enable.set_itren(true);
            enable.set_hdbgen(true);
            self.write_dscr(enable)?;

            self.save_registers()?;

            let reason = classify_halt(dscr.moe(), &self.active_watchpoints(), self.step_armed);
            self.step_armed = false;
            self.status = CoreStatus::Halted(reason);
        }
        Ok(self.status)
    }

    fn halt_resume(&mut self, step: bool) -> Result<(), Error> {
        if !self.status.is_halted() {
            return Ok(());
        }

        // Stale instruction caches on VMSA cores would hide freshly written
        // breakpoints or code; r0 is restored right after.
        if self.family == CortexArFamily::CortexA {
            self.coproc_write(CP15_ICIALLU, 0)?;
        }

        self.restore_registers()?;

        let mut dscr = self.read_dscr()?;
        if step {
            // TODO: ARMv8-A parts (A53/A55) step through EDECR.SS in the
            // v8 external debug register map instead of a mismatch
            // breakpoint.
            //
            // The reserved slot becomes an address mismatch trigger on the
            // current PC: any instruction but this one halts, which is a
            // single step.
            let thumb = self.regs.cpsr & CPSR_THUMB != 0;
            let pc = u64::from(self.regs.r[15]);
            self.config_breakpoint(self.step_slot, BCR_TYPE_MISMATCH, pc, thumb)?;
            dscr.set_intdis(true);
        } else {
            self.memory
                .write_word_32(self.base + DBG_BCR_BASE + (self.step_slot as u64) * 4, 0)?;
            dscr.set_intdis(false);
        }
        self.step_armed = step;

        dscr.set_itren(false);
        self.write_dscr(dscr)?;

        self.memory.write_word_32(
            self.base + DBG_DRCR,
            DRCR_CLEAR_STICKY_EXC | DRCR_RESTART_REQ,
        )?;

        // Wait for the restart acknowledgement; expiry is logged, not
        // escalated.
        let start = Instant::now();
        loop {
            let dscr = self.read_dscr()?;
            if dscr.restarted() {
                break;
            }
            if start.elapsed() >= ADI_TIMEOUT {
                tracing::warn!("Core did not acknowledge the restart request");
                break;
            }
        }

        self.status = CoreStatus::Running;
        Ok(())
    }

    fn read_core_reg(&mut self, id: RegisterId) -> Result<u64, Error> {
        if !self.status.is_halted() {
            return Err(Error::CoreNotHalted);
        }
        match id.0 {
            0..=15 => Ok(u64::from(self.regs.r[id.0 as usize])),
            16 => Ok(u64::from(self.regs.cpsr)),
            other => Err(Error::InvalidRegister(other)),
        }
    }

    fn write_core_reg(&mut self, id: RegisterId, value: u64) -> Result<(), Error> {
        if !self.status.is_halted() {
            return Err(Error::CoreNotHalted);
        }
        match id.0 {
            0..=15 => self.regs.r[id.0 as usize] = value as u32,
            16 => self.regs.cpsr = value as u32,
            other => return Err(Error::InvalidRegister(other)),
        }
        Ok(())
    }

    fn available_breakpoint_units(&mut self) -> Result<u32, Error> {
        Ok(self.breakpoints.available())
    }

    fn available_watchpoint_units(&mut self) -> Result<u32, Error> {
        Ok(self.watchpoints.available())
    }

    fn breakwatch_set(&mut self, request: &BreakWatch) -> Result<usize, Error> {
        if request.kind == BreakWatchKind::Breakpoint {
            let slot = self
                .breakpoints
                .allocate()
                .ok_or(Error::NoFreeBreakwatchUnit)?;
            let thumb = request.size == 2;
            self.config_breakpoint(slot, 0, request.address, thumb)?;
            Ok(slot)
        } else {
            let slot = self
                .watchpoints
                .allocate()
                .ok_or(Error::NoFreeBreakwatchUnit)?;
            let mode = match request.kind {
                BreakWatchKind::WatchRead => WCR_MATCH_ON_LOAD,
                BreakWatchKind::WatchWrite => WCR_MATCH_ON_STORE,
                _ => WCR_MATCH_ANY_ACCESS,
            };
            // BAS is a bit-per-byte select within the matched word.
            let byte_mask =
                (((1u32 << request.size) - 1) << (request.address & 3)) << WCR_BAS_SHIFT;
            self.memory
                .write_word_32(
                    self.base + DBG_WVR_BASE + (slot as u64) * 4,
                    request.address as u32 & !3,
                )
                .map_err(Error::Arm)?;
            self.memory
                .write_word_32(
                    self.base + DBG_WCR_BASE + (slot as u64) * 4,
                    WCR_ENABLE | WCR_ALL_MODES | mode | byte_mask,
                )
                .map_err(Error::Arm)?;
            self.watch_addresses[slot] = Some(request.address);
            Ok(slot)
        }
    }

    fn breakwatch_clear(&mut self, request: &BreakWatch, slot: usize) -> Result<(), Error> {
        if request.kind == BreakWatchKind::Breakpoint {
            self.memory
                .write_word_32(self.base + DBG_BVR_BASE + (slot as u64) * 4, 0)
                .map_err(Error::Arm)?;
            self.memory
                .write_word_32(self.base + DBG_BCR_BASE + (slot as u64) * 4, 0)
                .map_err(Error::Arm)?;
            self.breakpoints.free(slot);
        } else {
            self.memory
                .write_word_32(self.base + DBG_WVR_BASE + (slot as u64) * 4, 0)
                .map_err(Error::Arm)?;
            self.memory
                .write_word_32(self.base + DBG_WCR_BASE + (slot as u64) * 4, 0)
                .map_err(Error::Arm)?;
            self.watchpoints.free(slot);
            self.watch_addresses[slot] = None;
        }
        Ok(())
    }

    fn check_error(&mut self) -> bool {
        std::mem::replace(&mut self.fault_latch, false)
    }
}

impl MemoryInterface for CortexAR {
    fn read_word_32(&mut self, address: u64) -> Result<u32, Error> {
        let mut word = [0u32];
        self.read_32(address, &mut word)?;
        Ok(word[0])
    }

    fn read_word_16(&mut self, address: u64) -> Result<u16, Error> {
        let mut bytes = [0u8; 2];
        self.read_8(address, &mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_word_8(&mut self, address: u64) -> Result<u8, Error> {
        let mut byte = [0u8];
        self.read_8(address, &mut byte)?;
        Ok(byte[0])
    }

    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), Error> {
        self.with_fault_bracket(address, |core| core.read_words_fast(data))
    }

    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error> {
        if address & 3 == 0 && data.len() % 4 == 0 {
            let mut words = vec![0u32; data.len() / 4];
            self.read_32(address, &mut words)?;
            for (chunk, word) in data.chunks_exact_mut(4).zip(words) {
                chunk.copy_from_slice(&word.to_le_bytes());
            }
            return Ok(());
        }
        self.with_fault_bracket(address, |core| core.read_bytes_slow(address, data))
    }

    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), Error> {
        self.write_32(address, &[data])
    }

    fn write_word_16(&mut self, address: u64, data: u16) -> Result<(), Error> {
        self.write_8(address, &data.to_le_bytes())
    }

    fn write_word_8(&mut self, address: u64, data: u8) -> Result<(), Error> {
        self.write_8(address, &[data])
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), Error> {
        self.with_fault_bracket(address, |core| core.write_words_fast(data))
    }

    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), Error> {
        if address & 3 == 0 && data.len() % 4 == 0 {
            let words: Vec<u32> = data
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
                .collect();
            return self.write_32(address, &words);
        }
        self.with_fault_bracket(address, |core| core.write_bytes_slow(address, data))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn moe_halt_request_classifies_as_request() {
        assert_eq!(
            classify_halt(MOE_HALT_REQUEST, &[], false),
            HaltReason::Request
        );
    }

    #[test]
    fn moe_breakpoint_variants_classify_as_breakpoint() {
        for moe in [MOE_BREAKPOINT, MOE_BKPT_INSN, MOE_VEC_CATCH, MOE_EXTERNAL_DBG] {
            assert_eq!(classify_halt(moe, &[], false), HaltReason::Breakpoint);
        }
    }

    #[test]
    fn moe_watchpoint_with_one_unit_reports_the_address() {
        assert_eq!(
            classify_halt(MOE_SYNC_WATCH, &[0x2000_1234], false),
            HaltReason::Watchpoint(Some(0x2000_1234))
        );
        assert_eq!(
            classify_halt(MOE_ASYNC_WATCH, &[0x2000_1234], false),
            HaltReason::Watchpoint(Some(0x2000_1234))
        );
    }

    #[test]
    fn moe_watchpoint_with_two_units_degrades_to_breakpoint() {
        // With two candidates the triggering address cannot be attributed;
        // misattributing would be worse than the generic report.
        assert_eq!(
            classify_halt(MOE_SYNC_WATCH, &[0x2000_1234, 0x2000_5678], false),
            HaltReason::Breakpoint
        );
    }

    #[test]
    fn armed_step_turns_the_halt_into_a_step_report() {
        assert_eq!(classify_halt(MOE_HALT_REQUEST, &[], true), HaltReason::Step);
        assert_eq!(classify_halt(MOE_BREAKPOINT, &[], true), HaltReason::Step);
    }

    mod driver {
        use super::super::super::super::{ArmError, ArmMemoryInterface};
        use super::super::*;
        use std::cell::RefCell;
        use std::collections::HashMap;
        use std::rc::Rc;

        /// Map backed fake debug register file, shared so the test can
        /// inspect writes while the driver owns its own handle.
        #[derive(Clone)]
        struct FakeDebugUnit {
            inner: Rc<RefCell<FakeDebugUnitInner>>,
        }

        struct FakeDebugUnitInner {
            words: HashMap<u64, u32>,
            writes: Vec<(u64, u32)>,
        }

        const BASE: u64 = 0x8001_0000;

        impl FakeDebugUnit {
            fn new(brps: u32, wrps: u32) -> Self {
                let mut words = HashMap::new();
                words.insert(BASE + DBG_DIDR, ((wrps - 1) << 28) | ((brps - 1) << 24));
                Self {
                    inner: Rc::new(RefCell::new(FakeDebugUnitInner {
                        words,
                        writes: Vec::new(),
                    })),
                }
            }

            fn wrote(&self, address: u64, value: u32) -> bool {
                self.inner.borrow().writes.contains(&(address, value))
            }
        }

        impl ArmMemoryInterface for FakeDebugUnit {
            fn read_word_32(&mut self, address: u64) -> Result<u32, ArmError> {
                Ok(*self.inner.borrow().words.get(&address).unwrap_or(&0))
            }

            fn read_word_16(&mut self, _address: u64) -> Result<u16, ArmError> {
                unimplemented!()
            }

            fn read_word_8(&mut self, _address: u64) -> Result<u8, ArmError> {
                unimplemented!()
            }

            fn read_32(&mut self, _address: u64, _data: &mut [u32]) -> Result<(), ArmError> {
                unimplemented!()
            }

            fn read_8(&mut self, _address: u64, _data: &mut [u8]) -> Result<(), ArmError> {
                unimplemented!()
            }

            fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), ArmError> {
                let mut inner = self.inner.borrow_mut();
                inner.words.insert(address, data);
                inner.writes.push((address, data));
                Ok(())
            }

            fn write_word_16(&mut self, _address: u64, _data: u16) -> Result<(), ArmError> {
                unimplemented!()
            }

            fn write_word_8(&mut self, _address: u64, _data: u8) -> Result<(), ArmError> {
                unimplemented!()
            }

            fn write_32(&mut self, _address: u64, _data: &[u32]) -> Result<(), ArmError> {
                unimplemented!()
            }

            fn write_8(&mut self, _address: u64, _data: &[u8]) -> Result<(), ArmError> {
                unimplemented!()
            }
        }

        #[test]
        fn one_breakpoint_slot_is_reserved_for_stepping() {
            let unit = FakeDebugUnit::new(6, 4);
            let core = CortexAR::new(Box::new(unit), BASE, CortexArFamily::CortexA);
            let mut core = core.unwrap();

            // 6 hardware slots: 5 for the allocator, the last reserved.
            assert_eq!(core.available_breakpoint_units().unwrap(), 5);
            assert_eq!(core.step_slot, 5);
            assert_eq!(core.available_watchpoint_units().unwrap(), 4);

            core.status = CoreStatus::Halted(HaltReason::Request);
            let request = BreakWatch {
                kind: BreakWatchKind::Breakpoint,
                address: 0x8000_0000,
                size: 4,
            };
            for expected in 0..5 {
                assert_eq!(core.breakwatch_set(&request).unwrap(), expected);
            }
            // The reserved slot is never handed out.
            assert!(matches!(
                core.breakwatch_set(&request),
                Err(Error::NoFreeBreakwatchUnit)
            ));
        }

        #[test]
        fn halt_request_writes_drcr() {
            let unit = FakeDebugUnit::new(2, 2);
            let mut core =
                CortexAR::new(Box::new(unit.clone()), BASE, CortexArFamily::CortexR).unwrap();

            core.halt_request().unwrap();

            assert!(unit.wrote(BASE + DBG_DRCR, DRCR_HALT_REQ));
        }

        #[test]
        fn watchpoint_programs_value_and_control() {
            let unit = FakeDebugUnit::new(2, 2);
            let mut core =
                CortexAR::new(Box::new(unit.clone()), BASE, CortexArFamily::CortexA).unwrap();
            core.status = CoreStatus::Halted(HaltReason::Request);

            let request = BreakWatch {
                kind: BreakWatchKind::WatchWrite,
                address: 0x2000_0002,
                size: 2,
            };
            let slot = core.breakwatch_set(&request).unwrap();
            assert_eq!(slot, 0);

            // Value register holds the word aligned address.
            assert!(unit.wrote(BASE + DBG_WVR_BASE, 0x2000_0000));
            // Control: enabled, all modes, store matching, BAS selecting
            // the upper half word.
            let expected =
                WCR_ENABLE | WCR_ALL_MODES | WCR_MATCH_ON_STORE | (0b1100 << WCR_BAS_SHIFT);
            assert!(unit.wrote(BASE + DBG_WCR_BASE, expected));
        }
    }
}
