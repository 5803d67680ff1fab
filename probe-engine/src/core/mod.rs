//! Probe-independent target handles and the core capability contract.

use crate::error::Error;
use crate::memory::MemoryInterface;

/// The instruction set architecture family of a core.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Architecture {
    /// An ARM core (Cortex-M, Cortex-A or Cortex-R).
    Arm,
    /// A RISC-V hart.
    Riscv,
}

/// Why a core entered the halted state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// Halted on explicit debugger request.
    Request,
    /// Halted on a breakpoint: a comparator match, a BKPT/EBREAK
    /// instruction, or vector catch.
    Breakpoint,
    /// Halted on a watchpoint. The triggering address is reported when it
    /// can be attributed to exactly one active watchpoint unit; with more
    /// than one active unit the halt degrades to [`HaltReason::Breakpoint`]
    /// instead of guessing.
    Watchpoint(Option<u64>),
    /// Halted after a single instruction step.
    Step,
    /// Halted because of a fault (lockup, debug fault, exception).
    Fault,
}

/// The run state of a core as seen by `halt_poll`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoreStatus {
    /// The core is executing (or asleep in WFI/WFE).
    Running,
    /// The core is halted in debug state.
    Halted(HaltReason),
}

impl CoreStatus {
    /// Is the core halted?
    pub fn is_halted(&self) -> bool {
        matches!(self, CoreStatus::Halted(_))
    }
}

/// An architecture specific register index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegisterId(pub u16);

impl From<u16> for RegisterId {
    fn from(value: u16) -> Self {
        RegisterId(value)
    }
}

/// The kind of a hardware break/watch unit request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BreakWatchKind {
    /// Instruction breakpoint.
    Breakpoint,
    /// Data watchpoint, trigger on loads.
    WatchRead,
    /// Data watchpoint, trigger on stores.
    WatchWrite,
    /// Data watchpoint, trigger on any access.
    WatchAccess,
}

impl BreakWatchKind {
    /// Is this a data watchpoint kind?
    pub fn is_watchpoint(&self) -> bool {
        !matches!(self, BreakWatchKind::Breakpoint)
    }
}

/// A hardware breakpoint or watchpoint request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BreakWatch {
    /// What to match on.
    pub kind: BreakWatchKind,
    /// Address to match.
    pub address: u64,
    /// Access size in bytes (watchpoints only; 1, 2, 4 or 8).
    pub size: u8,
}

/// The capability contract every core driver implements.
///
/// This is the operation table consumed by the GDB server and the flash
/// layer: run control, register access, memory access (via the
/// [`MemoryInterface`] supertrait) and hardware break/watch units.
pub trait CoreInterface: MemoryInterface {
    /// The architecture family of this core.
    fn architecture(&self) -> Architecture;

    /// Ask the core to halt.
    ///
    /// This only issues the request; poll [`CoreInterface::halt_poll`] until
    /// it reports a halted state. A write that times out is not fatal — the
    /// core may be asleep in WFI and the caller is expected to retry.
    fn halt_request(&mut self) -> Result<(), Error>;

    /// Check whether the core has halted, and if it has, classify why.
    ///
    /// On the halted edge this performs the architecture's halt entry work
    /// (clearing OS locks, saving the register file, enabling instruction
    /// injection) before classifying the halt reason.
    fn halt_poll(&mut self) -> Result<CoreStatus, Error>;

    /// Resume the core, optionally single-stepping one instruction.
    fn halt_resume(&mut self, step: bool) -> Result<(), Error>;

    /// Read a core register. Only valid while halted.
    fn read_core_reg(&mut self, id: RegisterId) -> Result<u64, Error>;

    /// Write a core register. Only valid while halted.
    fn write_core_reg(&mut self, id: RegisterId, value: u64) -> Result<(), Error>;

    /// Number of hardware breakpoint units usable by the caller.
    fn available_breakpoint_units(&mut self) -> Result<u32, Error>;

    /// Number of hardware watchpoint units usable by the caller.
    fn available_watchpoint_units(&mut self) -> Result<u32, Error>;

    /// Claim a hardware unit for the given break/watch request.
    ///
    /// Returns the claimed slot index, which is always below the matching
    /// `available_*_units` count.
    fn breakwatch_set(&mut self, request: &BreakWatch) -> Result<usize, Error>;

    /// Release the hardware unit previously claimed for this request.
    fn breakwatch_clear(&mut self, request: &BreakWatch, slot: usize) -> Result<(), Error>;

    /// Consume the per-call memory fault latch.
    ///
    /// Data aborts raised during instruction-injected memory access do not
    /// fail the session; they set a latch which the caller must check after
    /// each memory operation. Reading the latch clears it.
    fn check_error(&mut self) -> bool;
}

/// An opaque handle to one debuggable core found during discovery.
///
/// Owns the driver specific state and keeps the underlying access-port /
/// debug-port chain alive; dropping the last `Target` of a debug port
/// releases the transport.
pub struct Target {
    name: &'static str,
    core: Box<dyn CoreInterface>,
    breakwatches: Vec<(BreakWatch, usize)>,
}

impl Target {
    pub(crate) fn new(name: &'static str, core: Box<dyn CoreInterface>) -> Self {
        Self {
            name,
            core,
            breakwatches: Vec::new(),
        }
    }

    /// A short human readable driver name, e.g. `"ARM Cortex-M"`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Access the core capability table.
    pub fn core(&mut self) -> &mut dyn CoreInterface {
        self.core.as_mut()
    }

    /// Set a hardware breakpoint or watchpoint.
    pub fn set_breakwatch(&mut self, request: BreakWatch) -> Result<(), Error> {
        let slot = self.core.breakwatch_set(&request)?;
        self.breakwatches.push((request, slot));
        Ok(())
    }

    /// Clear a previously set hardware breakpoint or watchpoint.
    pub fn clear_breakwatch(&mut self, request: BreakWatch) -> Result<(), Error> {
        let index = self
            .breakwatches
            .iter()
            .position(|(bw, _)| *bw == request)
            .ok_or(Error::NoFreeBreakwatchUnit)?;
        let (request, slot) = self.breakwatches.swap_remove(index);
        self.core.breakwatch_clear(&request, slot)
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("breakwatches", &self.breakwatches)
            .finish()
    }
}

/// First-fit allocator over a fixed set of hardware comparator slots.
///
/// The slot count comes from a hardware capability register read once at
/// probe time; the mask never grows beyond it.
#[derive(Debug, Clone)]
pub(crate) struct BreakwatchAllocator {
    available: u32,
    mask: u32,
}

impl BreakwatchAllocator {
    pub(crate) fn new(available: u32) -> Self {
        debug_assert!(available <= 32);
        Self { available, mask: 0 }
    }

    /// Number of slots the allocator will hand out.
    pub(crate) fn available(&self) -> u32 {
        self.available
    }

    /// Number of slots currently claimed.
    pub(crate) fn used(&self) -> u32 {
        self.mask.count_ones()
    }

    /// Claim the lowest free slot.
    pub(crate) fn allocate(&mut self) -> Option<usize> {
        for slot in 0..self.available as usize {
            if self.mask & (1 << slot) == 0 {
                self.mask |= 1 << slot;
                return Some(slot);
            }
        }
        None
    }

    /// Release a slot. Releasing a free slot is a no-op.
    pub(crate) fn free(&mut self, slot: usize) {
        if slot < self.available as usize {
            self.mask &= !(1 << slot);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allocator_is_first_fit_and_bounded() {
        let mut alloc = BreakwatchAllocator::new(4);

        for expected in 0..4 {
            assert_eq!(alloc.allocate(), Some(expected));
        }
        // All slots in use: allocation fails rather than exceeding the
        // hardware reported count.
        assert_eq!(alloc.allocate(), None);
        assert_eq!(alloc.used(), 4);
    }

    #[test]
    fn freed_slot_is_reallocated() {
        let mut alloc = BreakwatchAllocator::new(3);
        assert_eq!(alloc.allocate(), Some(0));
        assert_eq!(alloc.allocate(), Some(1));
        assert_eq!(alloc.allocate(), Some(2));

        // set -> clear -> set round-trips to the same slot under first-fit.
        alloc.free(1);
        assert_eq!(alloc.allocate(), Some(1));
        assert_eq!(alloc.allocate(), None);
    }

    #[test]
    fn zero_units_never_allocates() {
        let mut alloc = BreakwatchAllocator::new(0);
        assert_eq!(alloc.allocate(), None);
        alloc.free(0);
        assert_eq!(alloc.used(), 0);
    }
}
