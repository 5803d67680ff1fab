//! Run control for Cortex-M cores.
//!
//! Cortex-M debug lives at architected addresses in the System Control
//! Space and is driven entirely through the memory AP: DHCSR/DFSR for run
//! control, DCRSR/DCRDR for register access, the FPB for breakpoints and
//! the DWT for watchpoints.

use super::super::{ArmError, ArmMemoryInterface};
use super::MemoryMappedRegister;
use crate::core::{
    Architecture, BreakWatch, BreakWatchKind, BreakwatchAllocator, CoreInterface, CoreStatus,
    HaltReason, RegisterId,
};
use crate::error::Error;
use crate::memory::MemoryInterface;
use bitfield::bitfield;
use std::time::Instant;

bitfield! {
    /// Debug Halting Control and Status Register.
    ///
    /// Writes only take effect with the debug key in the top half word; use
    /// [`Dhcsr::enable_write`].
    #[derive(Copy, Clone)]
    pub struct Dhcsr(u32);
    impl Debug;
    /// The core has been reset since the last read. Sticky.
    pub s_reset_st, _: 25;
    /// An instruction has completed since the last read. Sticky.
    pub s_retire_st, _: 24;
    /// The core is locked up on an unrecoverable exception.
    pub s_lockup, _: 19;
    /// The core is sleeping (WFI/WFE).
    pub s_sleep, _: 18;
    /// The core is halted in debug state.
    pub s_halt, _: 17;
    /// DCRSR/DCRDR transfer handshake.
    pub s_regrdy, _: 16;
    /// Allow imprecise entry to debug state.
    pub c_snapstall, set_c_snapstall: 5;
    /// Mask PendSV, SysTick and external interrupts while halted.
    pub c_maskints, set_c_maskints: 3;
    /// Single step enable.
    pub c_step, set_c_step: 2;
    /// Halt request.
    pub c_halt, set_c_halt: 1;
    /// Halting debug enable.
    pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr {
    /// Place the debug key in the top half word, making a write effective.
    pub fn enable_write(&mut self) {
        self.0 &= !(0xffff << 16);
        self.0 |= 0xa05f << 16;
    }
}

impl From<u32> for Dhcsr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dhcsr> for u32 {
    fn from(value: Dhcsr) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for Dhcsr {
    const ADDRESS_OFFSET: u64 = 0xE000_EDF0;
    const NAME: &'static str = "DHCSR";
}

bitfield! {
    /// Debug Fault Status Register: why the core halted. All bits sticky,
    /// write-one-to-clear.
    #[derive(Copy, Clone)]
    pub struct Dfsr(u32);
    impl Debug;
    /// Halt caused by the external debug request signal.
    pub external, _: 4;
    /// Halt caused by vector catch.
    pub vcatch, _: 3;
    /// Halt caused by a DWT comparator match.
    pub dwttrap, _: 2;
    /// Halt caused by a BKPT instruction or FPB comparator.
    pub bkpt, _: 1;
    /// Halt caused by a C_HALT/C_STEP request.
    pub halted, _: 0;
}

impl Dfsr {
    fn clear_all() -> Self {
        Dfsr(0b11111)
    }
}

impl From<u32> for Dfsr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dfsr> for u32 {
    fn from(value: Dfsr) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for Dfsr {
    const ADDRESS_OFFSET: u64 = 0xE000_ED30;
    const NAME: &'static str = "DFSR";
}

bitfield! {
    /// Debug Core Register Selector Register.
    #[derive(Copy, Clone)]
    pub struct Dcrsr(u32);
    impl Debug;
    /// Direction: write the register from DCRDR instead of reading it.
    pub _, set_regwnr: 16;
    /// The register to transfer.
    pub u8, _, set_regsel: 6, 0;
}

impl From<u32> for Dcrsr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dcrsr> for u32 {
    fn from(value: Dcrsr) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for Dcrsr {
    const ADDRESS_OFFSET: u64 = 0xE000_EDF4;
    const NAME: &'static str = "DCRSR";
}

/// Debug Core Register Data Register.
#[derive(Debug, Copy, Clone)]
pub struct Dcrdr(pub u32);

impl From<u32> for Dcrdr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dcrdr> for u32 {
    fn from(value: Dcrdr) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for Dcrdr {
    const ADDRESS_OFFSET: u64 = 0xE000_EDF8;
    const NAME: &'static str = "DCRDR";
}

bitfield! {
    /// Debug Exception and Monitor Control Register.
    #[derive(Copy, Clone)]
    pub struct Demcr(u32);
    impl Debug;
    /// Global DWT/ITM enable.
    pub trcena, set_trcena: 24;
    /// Halt on HardFault.
    pub vc_harderr, set_vc_harderr: 10;
    /// Reset vector catch.
    pub vc_corereset, set_vc_corereset: 0;
}

impl From<u32> for Demcr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Demcr> for u32 {
    fn from(value: Demcr) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for Demcr {
    const ADDRESS_OFFSET: u64 = 0xE000_EDFC;
    const NAME: &'static str = "DEMCR";
}

bitfield! {
    /// Application Interrupt and Reset Control Register.
    #[derive(Copy, Clone)]
    pub struct Aircr(u32);
    impl Debug;
    /// Must hold 0x05FA on writes; see [`Aircr::vectkey`].
    get_vectkeystat, set_vectkey: 31, 16;
    /// Request a system reset.
    pub sysresetreq, set_sysresetreq: 2;
}

impl Aircr {
    /// Place the write key.
    pub fn vectkey(&mut self) {
        self.set_vectkey(0x05FA);
    }

    /// Whether the vector key reads back as valid.
    pub fn vectkeystat(&self) -> bool {
        self.get_vectkeystat() == 0xFA05
    }
}

impl From<u32> for Aircr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Aircr> for u32 {
    fn from(value: Aircr) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for Aircr {
    const ADDRESS_OFFSET: u64 = 0xE000_ED0C;
    const NAME: &'static str = "AIRCR";
}

bitfield! {
    /// Flash Patch Control Register.
    #[derive(Copy, Clone)]
    pub struct FpCtrl(u32);
    impl Debug;
    /// FPB architecture revision: 0 = v1, 1 = v2.
    pub u8, rev, _: 31, 28;
    u32, num_code_1, _: 14, 12;
    u32, num_code_0, _: 7, 4;
    /// Must be one for writes to take effect.
    pub _, set_key: 1;
    /// FPB enable.
    pub enable, set_enable: 0;
}

impl FpCtrl {
    /// The number of instruction address comparators.
    pub fn num_code(&self) -> u32 {
        (self.num_code_1() << 4) | self.num_code_0()
    }
}

impl From<u32> for FpCtrl {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<FpCtrl> for u32 {
    fn from(value: FpCtrl) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for FpCtrl {
    const ADDRESS_OFFSET: u64 = 0xE000_2000;
    const NAME: &'static str = "FP_CTRL";
}

/// Base address of the FPB comparator registers.
const FP_COMP_BASE: u64 = 0xE000_2008;

/// Compute the FPB v1 comparator value for a breakpoint address.
///
/// Version 1 comparators only reach the code region (below 0x2000_0000)
/// and encode which half word of the matched word breaks.
fn fp_rev1_comparator(address: u64) -> Result<u32, ArmError> {
    if address >= 0x2000_0000 {
        return Err(ArmError::UnsupportedBreakpointAddress(address));
    }
    let address = address as u32;
    let replace = if address & 0x2 == 0 { 0b01 } else { 0b10 };
    Ok((replace << 30) | (address & 0x1fff_fffc) | 1)
}

/// Compute the FPB v2 comparator value: the full address with the enable
/// bit in bit 0.
fn fp_rev2_comparator(address: u64) -> u32 {
    (address as u32 & !1) | 1
}

bitfield! {
    /// DWT Control Register.
    #[derive(Copy, Clone)]
    pub struct DwtCtrl(u32);
    impl Debug;
    /// The number of implemented comparators.
    pub u8, numcomp, _: 31, 28;
}

impl From<u32> for DwtCtrl {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<DwtCtrl> for u32 {
    fn from(value: DwtCtrl) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for DwtCtrl {
    const ADDRESS_OFFSET: u64 = 0xE000_1000;
    const NAME: &'static str = "DWT_CTRL";
}

/// DWT comparator bank: COMP/MASK/FUNCTION at a 0x10 stride.
const DWT_COMP_BASE: u64 = 0xE000_1020;
const DWT_MASK_BASE: u64 = 0xE000_1024;
const DWT_FUNCTION_BASE: u64 = 0xE000_1028;
const DWT_UNIT_STRIDE: u64 = 0x10;

/// DWT FUNCTION field values for data address watchpoints.
fn dwt_function(kind: BreakWatchKind) -> u32 {
    match kind {
        BreakWatchKind::WatchRead => 0b0101,
        BreakWatchKind::WatchWrite => 0b0110,
        BreakWatchKind::WatchAccess | BreakWatchKind::Breakpoint => 0b0111,
    }
}

/// A Cortex-M core attached through its memory AP.
pub struct CortexM {
    memory: Box<dyn ArmMemoryInterface>,
    status: CoreStatus,
    step_armed: bool,
    breakpoints: Option<BreakwatchAllocator>,
    watchpoints: Option<BreakwatchAllocator>,
    /// Addresses of active watchpoints, by unit.
    watch_addresses: Vec<Option<u64>>,
    fpb_rev: u8,
    fpb_enabled: bool,
}

impl CortexM {
    /// Attach to the Cortex-M reachable through `memory`.
    ///
    /// Enables halting debug so breakpoints work, and picks up an already
    /// halted core without disturbing it.
    pub fn new(mut memory: Box<dyn ArmMemoryInterface>) -> Result<Self, ArmError> {
        let dhcsr = Dhcsr(memory.read_word_32(Dhcsr::ADDRESS_OFFSET)?);
        let status = if dhcsr.s_halt() {
            CoreStatus::Halted(HaltReason::Request)
        } else {
            CoreStatus::Running
        };

        // Enable halting debug without requesting a halt.
        let mut enable = Dhcsr(0);
        enable.set_c_debugen(true);
        enable.set_c_halt(dhcsr.s_halt());
        enable.enable_write();
        memory.write_word_32(Dhcsr::ADDRESS_OFFSET, enable.into())?;

        // Clear stale sticky fault flags so the first real halt classifies
        // cleanly.
        memory.write_word_32(Dfsr::ADDRESS_OFFSET, Dfsr::clear_all().into())?;

        Ok(Self {
            memory,
            status,
            step_armed: false,
            breakpoints: None,
            watchpoints: None,
            watch_addresses: Vec::new(),
            fpb_rev: 0,
            fpb_enabled: false,
        })
    }

    fn write_dhcsr(&mut self, mut dhcsr: Dhcsr) -> Result<(), ArmError> {
        dhcsr.enable_write();
        self.memory
            .write_word_32(Dhcsr::ADDRESS_OFFSET, dhcsr.into())
    }

    fn wait_for_regrdy(&mut self) -> Result<(), ArmError> {
        let start = Instant::now();
        loop {
            let dhcsr = Dhcsr(self.memory.read_word_32(Dhcsr::ADDRESS_OFFSET)?);
            if dhcsr.s_regrdy() {
                return Ok(());
            }
            if start.elapsed() >= super::super::communication_interface::ADI_TIMEOUT {
                return Err(ArmError::Timeout);
            }
        }
    }

    fn breakpoint_units(&mut self) -> Result<&mut BreakwatchAllocator, ArmError> {
        if self.breakpoints.is_none() {
            let ctrl = FpCtrl(self.memory.read_word_32(FpCtrl::ADDRESS_OFFSET)?);
            self.fpb_rev = ctrl.rev();
            self.breakpoints = Some(BreakwatchAllocator::new(ctrl.num_code()));
        }
        Ok(self.breakpoints.as_mut().unwrap())
    }

    fn watchpoint_units(&mut self) -> Result<&mut BreakwatchAllocator, ArmError> {
        if self.watchpoints.is_none() {
            // The DWT is dead until DEMCR.TRCENA is set.
            let mut demcr = Demcr(self.memory.read_word_32(Demcr::ADDRESS_OFFSET)?);
            demcr.set_trcena(true);
            self.memory
                .write_word_32(Demcr::ADDRESS_OFFSET, demcr.into())?;

            let ctrl = DwtCtrl(self.memory.read_word_32(DwtCtrl::ADDRESS_OFFSET)?);
            let count = u32::from(ctrl.numcomp());
            self.watchpoints = Some(BreakwatchAllocator::new(count));
            self.watch_addresses = vec![None; count as usize];
        }
        Ok(self.watchpoints.as_mut().unwrap())
    }

    fn enable_fpb(&mut self) -> Result<(), ArmError> {
        if !self.fpb_enabled {
            let mut ctrl = FpCtrl(0);
            ctrl.set_key(true);
            ctrl.set_enable(true);
            self.memory
                .write_word_32(FpCtrl::ADDRESS_OFFSET, ctrl.into())?;
            self.fpb_enabled = true;
        }
        Ok(())
    }

    /// Request a system reset through AIRCR.
    ///
    /// The write needs the vector key; whether the core halts afterwards
    /// depends on the vector catch configuration in DEMCR.
    pub fn reset_system(&mut self) -> Result<(), ArmError> {
        let mut aircr = Aircr(0);
        aircr.vectkey();
        aircr.set_sysresetreq(true);
        self.memory
            .write_word_32(Aircr::ADDRESS_OFFSET, aircr.into())?;
        self.status = CoreStatus::Running;
        Ok(())
    }

    /// Classify a halt from the sticky DFSR flags.
    fn halt_reason(&self, dfsr: Dfsr) -> HaltReason {
        if dfsr.bkpt() || dfsr.vcatch() {
            HaltReason::Breakpoint
        } else if dfsr.dwttrap() {
            // The DWT does not report which comparator matched; the address
            // can only be attributed with exactly one watchpoint armed.
            let active: Vec<u64> = self.watch_addresses.iter().flatten().copied().collect();
            match active.as_slice() {
                [address] => HaltReason::Watchpoint(Some(*address)),
                [] => HaltReason::Watchpoint(None),
                _ => HaltReason::Breakpoint,
            }
        } else if dfsr.halted() {
            if self.step_armed {
                HaltReason::Step
            } else {
                HaltReason::Request
            }
        } else if dfsr.external() {
            HaltReason::Request
        } else {
            HaltReason::Fault
        }
    }
}

impl CoreInterface for CortexM {
    fn architecture(&self) -> Architecture {
        Architecture::Arm
    }

    fn halt_request(&mut self) -> Result<(), Error> {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        dhcsr.set_c_halt(true);
        self.write_dhcsr(dhcsr)?;
        Ok(())
    }

    fn halt_poll(&mut self) -> Result<CoreStatus, Error> {
        let dhcsr = Dhcsr(self.memory.read_word_32(Dhcsr::ADDRESS_OFFSET)?);

        if dhcsr.s_lockup() {
            tracing::error!("The core is locked up on an unrecoverable exception");
            self.status = CoreStatus::Halted(HaltReason::Fault);
            return Ok(self.status);
        }
        if !dhcsr.s_halt() {
            self.status = CoreStatus::Running;
            return Ok(self.status);
        }

        if !self.status.is_halted() {
            let dfsr = Dfsr(self.memory.read_word_32(Dfsr::ADDRESS_OFFSET)?);
            // The flags are sticky; clear them so the next halt is
            // attributed to its own cause.
            self.memory
                .write_word_32(Dfsr::ADDRESS_OFFSET, Dfsr::clear_all().into())?;
            let reason = self.halt_reason(dfsr);
            self.step_armed = false;
            self.status = CoreStatus::Halted(reason);
        }
        Ok(self.status)
    }

    fn halt_resume(&mut self, step: bool) -> Result<(), Error> {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_debugen(true);
        dhcsr.set_c_step(step);
        self.step_armed = step;
        self.write_dhcsr(dhcsr)?;
        self.status = CoreStatus::Running;
        Ok(())
    }

    fn read_core_reg(&mut self, id: RegisterId) -> Result<u64, Error> {
        if !self.status.is_halted() {
            return Err(Error::CoreNotHalted);
        }
        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regsel(id.0 as u8);
        self.memory
            .write_word_32(Dcrsr::ADDRESS_OFFSET, dcrsr.into())
            .map_err(Error::Arm)?;
        self.wait_for_regrdy()?;
        let value = self.memory.read_word_32(Dcrdr::ADDRESS_OFFSET)?;
        Ok(u64::from(value))
    }

    fn write_core_reg(&mut self, id: RegisterId, value: u64) -> Result<(), Error> {
        if !self.status.is_halted() {
            return Err(Error::CoreNotHalted);
        }
        self.memory
            .write_word_32(Dcrdr::ADDRESS_OFFSET, value as u32)
            .map_err(Error::Arm)?;
        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regsel(id.0 as u8);
        dcrsr.set_regwnr(true);
        self.memory
            .write_word_32(Dcrsr::ADDRESS_OFFSET, dcrsr.into())
            .map_err(Error::Arm)?;
        self.wait_for_regrdy()?;
        Ok(())
    }

    fn available_breakpoint_units(&mut self) -> Result<u32, Error> {
        Ok(self.breakpoint_units()?.available())
    }

    fn available_watchpoint_units(&mut self) -> Result<u32, Error> {
        Ok(self.watchpoint_units()?.available())
    }

    fn breakwatch_set(&mut self, request: &BreakWatch) -> Result<usize, Error> {
        if request.kind == BreakWatchKind::Breakpoint {
            let fpb_rev = {
                self.breakpoint_units()?;
                self.fpb_rev
            };
            let comparator = match fpb_rev {
                0 => fp_rev1_comparator(request.address)?,
                _ => fp_rev2_comparator(request.address),
            };
            let slot = self
                .breakpoint_units()?
                .allocate()
                .ok_or(Error::NoFreeBreakwatchUnit)?;
            self.enable_fpb()?;
            self.memory
                .write_word_32(FP_COMP_BASE + slot as u64 * 4, comparator)
                .map_err(Error::Arm)?;
            Ok(slot)
        } else {
            let slot = self
                .watchpoint_units()?
                .allocate()
                .ok_or(Error::NoFreeBreakwatchUnit)?;
            let unit = slot as u64 * DWT_UNIT_STRIDE;
            self.memory
                .write_word_32(DWT_COMP_BASE + unit, request.address as u32)
                .map_err(Error::Arm)?;
            // MASK holds the number of ignored low address bits.
            let mask = request.size.max(1).trailing_zeros();
            self.memory
                .write_word_32(DWT_MASK_BASE + unit, mask)
                .map_err(Error::Arm)?;
            self.memory
                .write_word_32(DWT_FUNCTION_BASE + unit, dwt_function(request.kind))
                .map_err(Error::Arm)?;
            self.watch_addresses[slot] = Some(request.address);
            Ok(slot)
        }
    }

    fn breakwatch_clear(&mut self, request: &BreakWatch, slot: usize) -> Result<(), Error> {
        if request.kind == BreakWatchKind::Breakpoint {
            self.memory
                .write_word_32(FP_COMP_BASE + slot as u64 * 4, 0)
                .map_err(Error::Arm)?;
            self.breakpoint_units()?.free(slot);
        } else {
            let unit = slot as u64 * DWT_UNIT_STRIDE;
            self.memory
                .write_word_32(DWT_FUNCTION_BASE + unit, 0)
                .map_err(Error::Arm)?;
            self.watchpoint_units()?.free(slot);
            self.watch_addresses[slot] = None;
        }
        Ok(())
    }

    fn check_error(&mut self) -> bool {
        // Cortex-M memory access goes through the AP, where bus faults
        // surface as errors on the access itself; there is no injected
        // transfer to latch faults from.
        false
    }
}

impl MemoryInterface for CortexM {
    fn read_word_32(&mut self, address: u64) -> Result<u32, Error> {
        Ok(self.memory.read_word_32(address)?)
    }

    fn read_word_16(&mut self, address: u64) -> Result<u16, Error> {
        Ok(self.memory.read_word_16(address)?)
    }

    fn read_word_8(&mut self, address: u64) -> Result<u8, Error> {
        Ok(self.memory.read_word_8(address)?)
    }

    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), Error> {
        Ok(self.memory.read_32(address, data)?)
    }

    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error> {
        Ok(self.memory.read_8(address, data)?)
    }

    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), Error> {
        Ok(self.memory.write_word_32(address, data)?)
    }

    fn write_word_16(&mut self, address: u64, data: u16) -> Result<(), Error> {
        Ok(self.memory.write_word_16(address, data)?)
    }

    fn write_word_8(&mut self, address: u64, data: u8) -> Result<(), Error> {
        Ok(self.memory.write_word_8(address, data)?)
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), Error> {
        Ok(self.memory.write_32(address, data)?)
    }

    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), Error> {
        Ok(self.memory.write_8(address, data)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    /// Map backed fake SCS memory.
    struct FakeScs {
        words: HashMap<u64, u32>,
    }

    impl FakeScs {
        fn new() -> Self {
            let mut words = HashMap::new();
            // S_REGRDY always set so register transfers complete.
            words.insert(Dhcsr::ADDRESS_OFFSET, 1 << 16);
            Self { words }
        }

        fn set(&mut self, address: u64, value: u32) {
            self.words.insert(address, value);
        }
    }

    impl ArmMemoryInterface for FakeScs {
        fn read_word_32(&mut self, address: u64) -> Result<u32, ArmError> {
            Ok(*self.words.get(&address).unwrap_or(&0))
        }

        fn read_word_16(&mut self, address: u64) -> Result<u16, ArmError> {
            Ok(self.read_word_32(address)? as u16)
        }

        fn read_word_8(&mut self, address: u64) -> Result<u8, ArmError> {
            Ok(self.read_word_32(address)? as u8)
        }

        fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError> {
            for (index, word) in data.iter_mut().enumerate() {
                *word = self.read_word_32(address + index as u64 * 4)?;
            }
            Ok(())
        }

        fn read_8(&mut self, _address: u64, _data: &mut [u8]) -> Result<(), ArmError> {
            unimplemented!()
        }

        fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), ArmError> {
            if address == Dhcsr::ADDRESS_OFFSET {
                // The upper half of DHCSR holds read-only status bits; a
                // write only lands in the control half.
                let status = *self.words.get(&address).unwrap_or(&0) & 0xffff_0000;
                self.set(address, status | (data & 0xffff));
            } else {
                self.set(address, data);
            }
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

    fn halted_core(dfsr: u32) -> CortexM {
        let mut scs = FakeScs::new();
        scs.set(Dhcsr::ADDRESS_OFFSET, (1 << 17) | (1 << 16));
        scs.set(Dfsr::ADDRESS_OFFSET, dfsr);
        let mut core = CortexM::new(Box::new(scs)).unwrap();
        // Forget the connect-time state so halt_poll reclassifies.
        core.status = CoreStatus::Running;
        // DFSR was cleared during attach; re-arm it.
        core.memory.write_word_32(Dfsr::ADDRESS_OFFSET, dfsr).unwrap();
        core
    }

    #[test]
    fn running_core_polls_as_running() {
        let mut scs = FakeScs::new();
        scs.set(Dhcsr::ADDRESS_OFFSET, 0);
        let mut core = CortexM::new(Box::new(scs)).unwrap();
        assert_eq!(core.halt_poll().unwrap(), CoreStatus::Running);
    }

    #[test]
    fn bkpt_halt_classifies_as_breakpoint() {
        let mut core = halted_core(0b00010);
        assert_eq!(
            core.halt_poll().unwrap(),
            CoreStatus::Halted(HaltReason::Breakpoint)
        );
    }

    #[test]
    fn halt_request_classifies_as_request() {
        let mut core = halted_core(0b00001);
        assert_eq!(
            core.halt_poll().unwrap(),
            CoreStatus::Halted(HaltReason::Request)
        );
    }

    #[test]
    fn dwt_trap_reports_the_single_watchpoint_address() {
        let mut core = halted_core(0b00100);
        core.watch_addresses = vec![Some(0x2000_0010), None];
        assert_eq!(
            core.halt_poll().unwrap(),
            CoreStatus::Halted(HaltReason::Watchpoint(Some(0x2000_0010)))
        );
    }

    #[test]
    fn dwt_trap_with_two_watchpoints_degrades_to_breakpoint() {
        let mut core = halted_core(0b00100);
        core.watch_addresses = vec![Some(0x2000_0010), Some(0x2000_0020)];
        assert_eq!(
            core.halt_poll().unwrap(),
            CoreStatus::Halted(HaltReason::Breakpoint)
        );
    }

    #[test]
    fn fpb_rev1_comparator_encoding() {
        // Word aligned address breaks on the lower half word.
        assert_eq!(fp_rev1_comparator(0x0800_0000).unwrap(), 0x4800_0001);
        // Upper half word.
        assert_eq!(fp_rev1_comparator(0x0800_0002).unwrap(), 0x8800_0001);
        // Out of the code region: not representable in a v1 comparator.
        assert!(fp_rev1_comparator(0x2000_0000).is_err());
    }

    #[test]
    fn breakpoint_slots_first_fit_through_the_fpb() {
        let mut scs = FakeScs::new();
        scs.set(Dhcsr::ADDRESS_OFFSET, (1 << 17) | (1 << 16));
        // FPB v1 with 4 comparators.
        scs.set(FpCtrl::ADDRESS_OFFSET, 4 << 4);
        let mut core = CortexM::new(Box::new(scs)).unwrap();

        let request = BreakWatch {
            kind: BreakWatchKind::Breakpoint,
            address: 0x100,
            size: 0,
        };
        assert_eq!(core.breakwatch_set(&request).unwrap(), 0);
        assert_eq!(core.breakwatch_set(&request).unwrap(), 1);
        core.breakwatch_clear(&request, 0).unwrap();
        assert_eq!(core.breakwatch_set(&request).unwrap(), 0);
    }
}
