//! RISC-V debug support: Debug Modules, harts and run control.

pub mod communication_interface;

use communication_interface::{
    AbstractCommandErrorKind, AccessMemoryCommand, Data0, Data1, Data2, Data3, DebugModule,
    Dmcontrol, Dmstatus, Sbaddress0, Sbaddress1, Sbcs, Sbdata0, RISCV_TIMEOUT,
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

/// Errors of the RISC-V debug stack.
#[derive(Debug, thiserror::Error)]
pub enum RiscvError {
    /// An error with the probe transport occurred.
    #[error("An error with the usage of the probe occurred")]
    Probe(#[from] DebugProbeError),
    /// A bounded wait expired.
    #[error("Operation timed out")]
    Timeout,
    /// An abstract command failed.
    #[error("Abstract command failed: {0:?}")]
    AbstractCommand(AbstractCommandErrorKind),
    /// A system bus access failed with the given `sberror` value.
    #[error("System bus access failed with sberror {0}")]
    SystemBus(u8),
    /// The hart reports an access width this crate has no front end for.
    #[error("Unsupported hart access width {0}")]
    UnsupportedWidth(u8),
    /// The hart did not halt in time for its initial probe.
    #[error("The hart did not halt")]
    HaltFailed,
}

// Debug and trigger CSRs, plus the machine information CSRs read at
// discovery time.
const CSR_MISA: u16 = 0x301;
const CSR_TSELECT: u16 = 0x7a0;
const CSR_TDATA1: u16 = 0x7a1;
const CSR_TDATA2: u16 = 0x7a2;
const CSR_DCSR: u16 = 0x7b0;
const CSR_MVENDORID: u16 = 0xf11;
const CSR_MARCHID: u16 = 0xf12;
const CSR_MIMPID: u16 = 0xf13;
const CSR_MHARTID: u16 = 0xf14;

/// GPR n is reached through abstract register number 0x1000 + n.
const GPR_REGNO_BASE: u16 = 0x1000;

/// An upper bound on trigger enumeration, over any real implementation.
const MAX_TRIGGERS: u32 = 32;

bitfield! {
    /// The `dcsr` debug CSR.
    #[derive(Copy, Clone)]
    pub struct Dcsr(u32);
    impl Debug;
    /// Why the hart is in debug mode.
    pub u8, cause, _: 8, 6;
    /// Single step on resume.
    pub step, set_step: 2;
}

impl From<u32> for Dcsr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dcsr> for u32 {
    fn from(value: Dcsr) -> Self {
        value.0
    }
}

// `dcsr.cause` values.
const DCSR_CAUSE_EBREAK: u8 = 1;
const DCSR_CAUSE_TRIGGER: u8 = 2;
const DCSR_CAUSE_HALTREQ: u8 = 3;
const DCSR_CAUSE_STEP: u8 = 4;

bitfield! {
    /// An `mcontrol` (type 2) trigger configuration word.
    #[derive(Copy, Clone, Default)]
    pub struct Mcontrol(u32);
    impl Debug;
    /// Trigger type; 2 for address/data match.
    pub u8, tpe, set_type: 31, 28;
    /// Only writable from debug mode.
    pub dmode, set_dmode: 27;
    /// Timing: fire before (0) or after (1) the matching operation.
    pub timing, set_timing: 18;
    /// Access size to match, 0 matching any.
    pub u8, size, set_size: 17, 16;
    /// Action: 1 enters debug mode.
    pub u8, action, set_action: 15, 12;
    /// Match condition; 0 is an exact address match.
    pub u8, match_, set_match: 10, 7;
    /// Match in machine mode.
    pub m, set_m: 6;
    /// Match in supervisor mode.
    pub s, set_s: 4;
    /// Match in user mode.
    pub u, set_u: 3;
    /// Fire on instruction execution.
    pub execute, set_execute: 2;
    /// Fire on stores.
    pub store, set_store: 1;
    /// Fire on loads.
    pub load, set_load: 0;
}

impl From<u32> for Mcontrol {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Mcontrol> for u32 {
    fn from(value: Mcontrol) -> Self {
        value.0
    }
}

/// Encode the trigger configuration for a break/watch request.
///
/// Execute triggers fire before the matched instruction; load/store
/// triggers fire after the access so its effects are observable, per the
/// trigger specification's recommended timing. All privilege modes match
/// and the action is debug-mode entry.
fn mcontrol_for(kind: BreakWatchKind, size: u8) -> Mcontrol {
    let mut control = Mcontrol::default();
    control.set_type(2);
    control.set_dmode(true);
    control.set_action(1);
    control.set_match(0);
    control.set_m(true);
    control.set_s(true);
    control.set_u(true);
    match kind {
        BreakWatchKind::Breakpoint => {
            control.set_execute(true);
            control.set_timing(false);
        }
        BreakWatchKind::WatchRead => {
            control.set_load(true);
            control.set_timing(true);
        }
        BreakWatchKind::WatchWrite => {
            control.set_store(true);
            control.set_timing(true);
        }
        BreakWatchKind::WatchAccess => {
            control.set_load(true);
            control.set_store(true);
            control.set_timing(true);
        }
    }
    // Encode the access size for watchpoints; breakpoints match any size.
    if kind.is_watchpoint() {
        control.set_size(match size {
            1 => 1,
            2 => 2,
            8 => 3,
            _ => 0,
        });
    }
    control
}

/// The register/memory front end width attached to a hart.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Xlen {
    /// The riscv32 front end.
    X32,
    /// The riscv64 front end.
    X64,
}

impl Xlen {
    fn aarsize(self) -> u8 {
        match self {
            Xlen::X32 => 2,
            Xlen::X64 => 3,
        }
    }
}

/// A hart discovered on a Debug Module.
#[derive(Debug, Clone)]
pub struct Hart {
    /// The hart's index in the DM's selector space.
    pub hart_idx: u32,
    /// Native access width in bits: 32, 64 or 128.
    pub access_width: u8,
    /// The `misa` extension bits.
    pub extensions: u32,
    /// JEP106 vendor id from `mvendorid`.
    pub vendorid: u32,
    /// Microarchitecture id from `marchid`.
    pub archid: u64,
    /// Implementation id from `mimpid`.
    pub implid: u64,
    /// The hart id from `mhartid`.
    pub hartid: u64,
    /// Number of implemented trigger units.
    pub triggers: u32,
}

/// Enumerate the harts of a Debug Module.
///
/// Sweeps the hart selector up to the hardware-reported maximum, stopping
/// early at the first selection reporting non-existent (the specification
/// guarantees hart indices are dense).
pub fn enumerate_harts(module: &DebugModule) -> Result<Vec<Hart>, RiscvError> {
    let max_index = module.max_hart_index()?;
    tracing::debug!("DM at {:#x}: up to {} harts", module.base(), max_index + 1);

    let mut harts = Vec::new();
    for hart_idx in 0..=max_index {
        module.select_hart(hart_idx)?;
        let status: Dmstatus = module.read_register()?;
        if status.anynonexistent() {
            break;
        }

        match probe_hart(module, hart_idx) {
            Ok(hart) => harts.push(hart),
            Err(error) => {
                tracing::warn!("Hart {hart_idx} probe failed: {error}");
            }
        }
    }
    Ok(harts)
}

/// Halt a hart, discover its native access width and identity, and resume
/// it.
fn probe_hart(module: &DebugModule, hart_idx: u32) -> Result<Hart, RiscvError> {
    halt_hart(module, hart_idx)?;

    // The widest plausible width is implied by the number of data
    // registers; narrow down by attempting a misa read until one succeeds.
    let status: communication_interface::Abstractcs = module.read_register()?;
    let mut aarsize = match status.datacount() {
        0..=1 => 2,
        2..=3 => 3,
        _ => 4,
    };
    let misa = loop {
        match module.abstract_register_read(CSR_MISA, aarsize) {
            Ok(value) => break value,
            Err(RiscvError::AbstractCommand(AbstractCommandErrorKind::NotSupported))
                if aarsize > 2 =>
            {
                aarsize -= 1;
            }
            Err(error) => return Err(error),
        }
    };
    let access_width = 8 * (1 << aarsize);

    let vendorid = module.abstract_register_read(CSR_MVENDORID, aarsize)? as u32;
    let archid = module.abstract_register_read(CSR_MARCHID, aarsize)?;
    let implid = module.abstract_register_read(CSR_MIMPID, aarsize)?;
    let hartid = module.abstract_register_read(CSR_MHARTID, aarsize)?;

    let triggers = enumerate_triggers(module, aarsize)?;

    tracing::info!(
        "Hart {hart_idx}: rv{access_width}, vendor {vendorid:#x}, arch {archid:#x}, \
         impl {implid:#x}, id {hartid:#x}, {triggers} triggers"
    );

    resume_hart(module, hart_idx)?;

    Ok(Hart {
        hart_idx,
        access_width,
        extensions: misa as u32,
        vendorid,
        archid,
        implid,
        hartid,
        triggers,
    })
}

fn halt_hart(module: &DebugModule, hart_idx: u32) -> Result<(), RiscvError> {
    let mut control = Dmcontrol::default();
    control.set_dmactive(true);
    control.set_hartsel(hart_idx);
    control.set_haltreq(true);
    module.write_register(control)?;

    let start = Instant::now();
    loop {
        let status: Dmstatus = module.read_register()?;
        if status.allhalted() {
            break;
        }
        if start.elapsed() >= RISCV_TIMEOUT {
            return Err(RiscvError::HaltFailed);
        }
    }

    // Deassert the halt request.
    module.select_hart(hart_idx)?;
    Ok(())
}

fn resume_hart(module: &DebugModule, hart_idx: u32) -> Result<(), RiscvError> {
    let mut control = Dmcontrol::default();
    control.set_dmactive(true);
    control.set_hartsel(hart_idx);
    control.set_resumereq(true);
    module.write_register(control)?;

    let start = Instant::now();
    loop {
        let status: Dmstatus = module.read_register()?;
        if status.allresumeack() {
            break;
        }
        if start.elapsed() >= RISCV_TIMEOUT {
            tracing::warn!("Hart {hart_idx} did not acknowledge the resume request");
            break;
        }
    }
    module.select_hart(hart_idx)?;
    Ok(())
}

/// Count the trigger units by selecting each in turn until the selection
/// no longer sticks.
fn enumerate_triggers(module: &DebugModule, aarsize: u8) -> Result<u32, RiscvError> {
    for index in 0..MAX_TRIGGERS {
        match module.abstract_register_write(CSR_TSELECT, aarsize, u64::from(index)) {
            Ok(()) => {}
            Err(RiscvError::AbstractCommand(_)) => return Ok(index),
            Err(error) => return Err(error),
        }
        match module.abstract_register_read(CSR_TSELECT, aarsize) {
            Ok(selected) if selected == u64::from(index) => {}
            Ok(_) => return Ok(index),
            Err(RiscvError::AbstractCommand(_)) => return Ok(index),
            Err(error) => return Err(error),
        }
    }
    Ok(MAX_TRIGGERS)
}

/// A RISC-V hart exposed as a debuggable core.
///
/// The same driver backs the riscv32 and riscv64 front ends; the attached
/// [`Xlen`] decides register width and the abstract access size.
pub struct Riscv {
    module: DebugModule,
    hart: Hart,
    xlen: Xlen,
    status: CoreStatus,
    step_armed: bool,
    triggers: BreakwatchAllocator,
    /// Addresses of armed data-watch triggers, by unit.
    watch_addresses: Vec<Option<u64>>,
    /// Per-call memory fault latch, consumed by `check_error`.
    fault_latch: bool,
}

impl Riscv {
    /// Attach the width-appropriate front end to a discovered hart.
    pub fn new(module: DebugModule, hart: Hart) -> Result<Self, RiscvError> {
        let xlen = match hart.access_width {
            32 => Xlen::X32,
            64 => Xlen::X64,
            other => return Err(RiscvError::UnsupportedWidth(other)),
        };
        let trigger_count = hart.triggers;
        Ok(Self {
            module,
            hart,
            xlen,
            status: CoreStatus::Running,
            step_armed: false,
            triggers: BreakwatchAllocator::new(trigger_count),
            watch_addresses: vec![None; trigger_count as usize],
            fault_latch: false,
        })
    }

    /// The driver name for the target list.
    pub fn name(&self) -> &'static str {
        match self.xlen {
            Xlen::X32 => "RISC-V (rv32)",
            Xlen::X64 => "RISC-V (rv64)",
        }
    }

    fn select(&self) -> Result<(), RiscvError> {
        self.module.select_hart(self.hart.hart_idx)?;
        Ok(())
    }

    fn reg_read(&self, regno: u16) -> Result<u64, RiscvError> {
        self.module.abstract_register_read(regno, self.xlen.aarsize())
    }

    fn reg_write(&self, regno: u16, value: u64) -> Result<(), RiscvError> {
        self.module
            .abstract_register_write(regno, self.xlen.aarsize(), value)
    }

    /// Whether the system bus supports native accesses of `size` bytes.
    fn sysbus_supports(&self, sbcs: Sbcs, size: u8) -> bool {
        if sbcs.sbversion() < 1 {
            return false;
        }
        match size {
            1 => sbcs.sbaccess8(),
            2 => sbcs.sbaccess16(),
            4 => sbcs.sbaccess32(),
            8 => sbcs.sbaccess64(),
            _ => false,
        }
    }

    fn sbcs_check_errors(&self) -> Result<(), RiscvError> {
        let sbcs: Sbcs = self.module.read_register()?;
        if sbcs.sberror() != 0 || sbcs.sbbusyerror() {
            let error = sbcs.sberror();
            // Both error fields are write-1-to-clear.
            let mut clear = Sbcs::default();
            clear.set_sberror(0b111);
            clear.set_sbbusyerror(true);
            self.module.write_register(clear)?;
            return Err(RiscvError::SystemBus(error));
        }
        Ok(())
    }

    fn write_sbaddress(&self, address: u64) -> Result<(), RiscvError> {
        let sbcs: Sbcs = self.module.read_register()?;
        if sbcs.sbasize() > 32 {
            self.module
                .write_register(Sbaddress1((address >> 32) as u32))?;
        }
        self.module.write_register(Sbaddress0(address as u32))
    }

    /// System bus fast path: stream words through sbdata0 with
    /// auto-increment.
    fn sysbus_read(&self, address: u64, size: u8, data: &mut [u32]) -> Result<(), RiscvError> {
        let mut sbcs = Sbcs::default();
        sbcs.set_sbaccess(size.trailing_zeros() as u8);
        sbcs.set_sbautoincrement(true);
        sbcs.set_sbreadonaddr(true);
        sbcs.set_sbreadondata(data.len() > 1);
        self.module.write_register(sbcs)?;
        self.write_sbaddress(address)?;

        let count = data.len();
        for (index, word) in data.iter_mut().enumerate() {
            if index == count - 1 {
                // Stop the read-on-data pipelining before draining the
                // final value.
                let mut sbcs = Sbcs::default();
                sbcs.set_sbaccess(size.trailing_zeros() as u8);
                self.module.write_register(sbcs)?;
            }
            *word = self.module.read_register::<Sbdata0>()?.0;
        }
        self.sbcs_check_errors()
    }

    fn sysbus_write(&self, address: u64, size: u8, data: &[u32]) -> Result<(), RiscvError> {
        let mut sbcs = Sbcs::default();
        sbcs.set_sbaccess(size.trailing_zeros() as u8);
        sbcs.set_sbautoincrement(true);
        self.module.write_register(sbcs)?;
        self.write_sbaddress(address)?;

        for word in data {
            self.module.write_register(Sbdata0(*word))?;
        }
        self.sbcs_check_errors()
    }

    /// Abstract command memory access: drive memory through the same
    /// command/data protocol as registers.
    fn abstract_mem_read(&self, address: u64, size: u8) -> Result<u32, RiscvError> {
        // arg1 (the address) lives in data1, or data2/3 on rv64.
        match self.xlen {
            Xlen::X32 => self.module.write_register(Data1(address as u32))?,
            Xlen::X64 => {
                self.module.write_register(Data2(address as u32))?;
                self.module
                    .write_register(Data3((address >> 32) as u32))?;
            }
        }
        let mut command = AccessMemoryCommand::default();
        command.set_cmdtype(2);
        command.set_aamsize(size.trailing_zeros() as u8);
        self.module.run_abstract_command(command.into())?;
        Ok(self.module.read_register::<Data0>()?.0)
    }

    fn abstract_mem_write(&self, address: u64, size: u8, value: u32) -> Result<(), RiscvError> {
        self.module.write_register(Data0(value))?;
        match self.xlen {
            Xlen::X32 => self.module.write_register(Data1(address as u32))?,
            Xlen::X64 => {
                self.module.write_register(Data2(address as u32))?;
                self.module
                    .write_register(Data3((address >> 32) as u32))?;
            }
        }
        let mut command = AccessMemoryCommand::default();
        command.set_cmdtype(2);
        command.set_aamsize(size.trailing_zeros() as u8);
        command.set_write(true);
        self.module.run_abstract_command(command.into())
    }

    /// One memory read of `size` bytes, preferring the system bus.
    fn mem_read_unit(&mut self, address: u64, size: u8) -> Result<u32, Error> {
        self.select().map_err(|e| self.latch(e))?;
        let sbcs: Sbcs = self.module.read_register().map_err(|e| self.latch(e))?;
        if self.sysbus_supports(sbcs, size) {
            let mut word = [0u32];
            self.sysbus_read(address, size, &mut word)
                .map_err(|e| self.latch(e))?;
            return Ok(word[0]);
        }
        match self.abstract_mem_read(address, size) {
            Ok(value) => Ok(value),
            // The implementation only does wider accesses: synthesize the
            // narrow read from an aligned word.
            Err(RiscvError::AbstractCommand(AbstractCommandErrorKind::NotSupported))
                if size < 4 =>
            {
                let aligned = address & !3;
                let word = self
                    .abstract_mem_read(aligned, 4)
                    .map_err(|e| self.latch(e))?;
                let shift = (address - aligned) * 8;
                Ok((word >> shift) & ((1u32 << (size * 8)) - 1))
            }
            Err(error) => Err(self.latch(error)),
        }
    }

    /// One memory write of `size` bytes, preferring the system bus.
    fn mem_write_unit(&mut self, address: u64, size: u8, value: u32) -> Result<(), Error> {
        self.select().map_err(|e| self.latch(e))?;
        let sbcs: Sbcs = self.module.read_register().map_err(|e| self.latch(e))?;
        if self.sysbus_supports(sbcs, size) {
            return self
                .sysbus_write(address, size, &[value])
                .map_err(|e| self.latch(e));
        }
        match self.abstract_mem_write(address, size, value) {
            Ok(()) => Ok(()),
            // Read-modify-write emulation at the wider native size.
            Err(RiscvError::AbstractCommand(AbstractCommandErrorKind::NotSupported))
                if size < 4 =>
            {
                let aligned = address & !3;
                let word = self
                    .abstract_mem_read(aligned, 4)
                    .map_err(|e| self.latch(e))?;
                let shift = ((address - aligned) * 8) as u32;
                let mask = (((1u64 << (size * 8)) - 1) as u32) << shift;
                let merged = (word & !mask) | ((value << shift) & mask);
                self.abstract_mem_write(aligned, 4, merged)
                    .map_err(|e| self.latch(e))
            }
            Err(error) => Err(self.latch(error)),
        }
    }

    /// Record the fault for `check_error` and convert it for propagation.
    fn latch(&mut self, error: RiscvError) -> Error {
        self.fault_latch = true;
        error.into()
    }

    fn active_watchpoints(&self) -> Vec<u64> {
        self.watch_addresses.iter().flatten().copied().collect()
    }
}

impl CoreInterface for Riscv {
    fn architecture(&self) -> Architecture {
        Architecture::Riscv
    }

    fn halt_request(&mut self) -> Result<(), Error> {
        let mut control = Dmcontrol::default();
        control.set_dmactive(true);
        control.set_hartsel(self.hart.hart_idx);
        control.set_haltreq(true);
        self.module.write_register(control)?;
        Ok(())
    }

    fn halt_poll(&mut self) -> Result<CoreStatus, Error> {
        self.select()?;
        let status: Dmstatus = self.module.read_register()?;
        if !status.allhalted() {
            self.status = CoreStatus::Running;
            return Ok(self.status);
        }

        if !self.status.is_halted() {
            // Deassert the halt request now that the hart took it.
            self.select()?;

            let dcsr = Dcsr(self.reg_read(CSR_DCSR)? as u32);
            let reason = match dcsr.cause() {
                DCSR_CAUSE_EBREAK => HaltReason::Breakpoint,
                DCSR_CAUSE_TRIGGER => match self.active_watchpoints().as_slice() {
                    [address] => HaltReason::Watchpoint(Some(*address)),
                    [] => HaltReason::Breakpoint,
                    _ => HaltReason::Breakpoint,
                },
                // Some implementations report a stepped halt as a plain
                // halt request; the armed step flag disambiguates.
                DCSR_CAUSE_HALTREQ if self.step_armed => HaltReason::Step,
                DCSR_CAUSE_HALTREQ => HaltReason::Request,
                DCSR_CAUSE_STEP => HaltReason::Step,
                _ => HaltReason::Fault,
            };
            self.step_armed = false;
            self.status = CoreStatus::Halted(reason);
        }
        Ok(self.status)
    }

    fn halt_resume(&mut self, step: bool) -> Result<(), Error> {
        if !self.status.is_halted() {
            return Ok(());
        }

        let mut dcsr = Dcsr(self.reg_read(CSR_DCSR)? as u32);
        dcsr.set_step(step);
        self.reg_write(CSR_DCSR, u64::from(u32::from(dcsr)))?;
        self.step_armed = step;

        let mut control = Dmcontrol::default();
        control.set_dmactive(true);
        control.set_hartsel(self.hart.hart_idx);
        control.set_resumereq(true);
        self.module.write_register(control)?;

        let start = Instant::now();
        loop {
            let status: Dmstatus = self.module.read_register()?;
            if status.allresumeack() {
                break;
            }
            if start.elapsed() >= RISCV_TIMEOUT {
                tracing::warn!("Hart did not acknowledge the resume request");
                break;
            }
        }
        self.select()?;
        self.status = CoreStatus::Running;
        Ok(())
    }

    fn read_core_reg(&mut self, id: RegisterId) -> Result<u64, Error> {
        if !self.status.is_halted() {
            return Err(Error::CoreNotHalted);
        }
        self.select()?;
        // GPR indices map onto the abstract register space; anything else
        // is taken as a CSR number.
        let regno = if id.0 < 32 {
            GPR_REGNO_BASE + id.0
        } else {
            id.0
        };
        Ok(self.reg_read(regno)?)
    }

    fn write_core_reg(&mut self, id: RegisterId, value: u64) -> Result<(), Error> {
        if !self.status.is_halted() {
            return Err(Error::CoreNotHalted);
        }
        self.select()?;
        let regno = if id.0 < 32 {
            GPR_REGNO_BASE + id.0
        } else {
            id.0
        };
        Ok(self.reg_write(regno, value)?)
    }

    fn available_breakpoint_units(&mut self) -> Result<u32, Error> {
        Ok(self.triggers.available())
    }

    fn available_watchpoint_units(&mut self) -> Result<u32, Error> {
        // Triggers are a shared pool between breakpoints and watchpoints.
        Ok(self.triggers.available())
    }

    fn breakwatch_set(&mut self, request: &BreakWatch) -> Result<usize, Error> {
        if !self.status.is_halted() {
            return Err(Error::CoreNotHalted);
        }
        self.select()?;
        let slot = self
            .triggers
            .allocate()
            .ok_or(Error::NoFreeBreakwatchUnit)?;

        let aarsize = self.xlen.aarsize();
        self.module
            .abstract_register_write(CSR_TSELECT, aarsize, slot as u64)?;
        let control = mcontrol_for(request.kind, request.size);
        self.module
            .abstract_register_write(CSR_TDATA1, aarsize, u64::from(u32::from(control)))?;
        self.module
            .abstract_register_write(CSR_TDATA2, aarsize, request.address)?;

        if request.kind.is_watchpoint() {
            self.watch_addresses[slot] = Some(request.address);
        }
        Ok(slot)
    }

    fn breakwatch_clear(&mut self, _request: &BreakWatch, slot: usize) -> Result<(), Error> {
        if !self.status.is_halted() {
            return Err(Error::CoreNotHalted);
        }
        self.select()?;
        let aarsize = self.xlen.aarsize();
        self.module
            .abstract_register_write(CSR_TSELECT, aarsize, slot as u64)?;
        self.module
            .abstract_register_write(CSR_TDATA1, aarsize, 0)?;
        self.triggers.free(slot);
        self.watch_addresses[slot] = None;
        Ok(())
    }

    fn check_error(&mut self) -> bool {
        std::mem::replace(&mut self.fault_latch, false)
    }
}

impl MemoryInterface for Riscv {
    fn supports_native_64bit_access(&mut self) -> bool {
        self.xlen == Xlen::X64
    }

    fn read_word_32(&mut self, address: u64) -> Result<u32, Error> {
        self.mem_read_unit(address, 4)
    }

    fn read_word_16(&mut self, address: u64) -> Result<u16, Error> {
        Ok(self.mem_read_unit(address, 2)? as u16)
    }

    fn read_word_8(&mut self, address: u64) -> Result<u8, Error> {
        Ok(self.mem_read_unit(address, 1)? as u8)
    }

    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        self.select().map_err(|e| self.latch(e))?;
        let sbcs: Sbcs = self.module.read_register().map_err(|e| self.latch(e))?;
        if self.sysbus_supports(sbcs, 4) {
            return self.sysbus_read(address, 4, data).map_err(|e| self.latch(e));
        }
        for (index, word) in data.iter_mut().enumerate() {
            *word = self.mem_read_unit(address + index as u64 * 4, 4)?;
        }
        Ok(())
    }

    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error> {
        for (index, byte) in data.iter_mut().enumerate() {
            *byte = self.read_word_8(address + index as u64)?;
        }
        Ok(())
    }

    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), Error> {
        self.mem_write_unit(address, 4, data)
    }

    fn write_word_16(&mut self, address: u64, data: u16) -> Result<(), Error> {
        self.mem_write_unit(address, 2, u32::from(data))
    }

    fn write_word_8(&mut self, address: u64, data: u8) -> Result<(), Error> {
        self.mem_write_unit(address, 1, u32::from(data))
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        self.select().map_err(|e| self.latch(e))?;
        let sbcs: Sbcs = self.module.read_register().map_err(|e| self.latch(e))?;
        if self.sysbus_supports(sbcs, 4) {
            return self
                .sysbus_write(address, 4, data)
                .map_err(|e| self.latch(e));
        }
        for (index, word) in data.iter().enumerate() {
            self.mem_write_unit(address + index as u64 * 4, 4, *word)?;
        }
        Ok(())
    }

    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), Error> {
        for (index, byte) in data.iter().enumerate() {
            self.write_word_8(address + index as u64, *byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mcontrol_breakpoint_fires_before_execution() {
        let control = mcontrol_for(BreakWatchKind::Breakpoint, 4);
        assert!(control.execute());
        assert!(!control.load());
        assert!(!control.store());
        assert!(!control.timing());
        assert_eq!(control.action(), 1);
        assert_eq!(control.tpe(), 2);
        assert!(control.m() && control.s() && control.u());
    }

    #[test]
    fn mcontrol_watchpoints_fire_after_the_access() {
        let read = mcontrol_for(BreakWatchKind::WatchRead, 4);
        assert!(read.load() && !read.store() && read.timing());

        let write = mcontrol_for(BreakWatchKind::WatchWrite, 4);
        assert!(write.store() && !write.load() && write.timing());

        let access = mcontrol_for(BreakWatchKind::WatchAccess, 4);
        assert!(access.load() && access.store());
    }

    #[test]
    fn mcontrol_encodes_watch_sizes() {
        assert_eq!(mcontrol_for(BreakWatchKind::WatchRead, 1).size(), 1);
        assert_eq!(mcontrol_for(BreakWatchKind::WatchRead, 2).size(), 2);
        assert_eq!(mcontrol_for(BreakWatchKind::WatchRead, 4).size(), 0);
    }
}
