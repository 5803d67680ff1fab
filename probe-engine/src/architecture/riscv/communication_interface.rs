//! Debug Module Interface communication.
//!
//! Implements discovery and register access for RISC-V Debug Modules as
//! described in the RISC-V debug specification (0.13 and 1.0): the DM chain
//! walk, hart selection, and the abstract command engine.

use super::RiscvError;
use crate::probe::DebugProbeError;
use bitfield::bitfield;
use num_traits::cast::FromPrimitive;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// The deadline applied to bounded polls on the DMI.
pub(crate) const RISCV_TIMEOUT: Duration = Duration::from_millis(250);

/// Raw 32-bit access to the DMI resource bus, as provided by a probe
/// driver (JTAG DTM, vendor serial DTM, ...).
pub trait DmiTransport {
    /// Read the DMI register at `address`.
    fn read(&mut self, address: u32) -> Result<u32, DebugProbeError>;

    /// Write the DMI register at `address`.
    fn write(&mut self, address: u32, value: u32) -> Result<(), DebugProbeError>;
}

/// A register of a Debug Module, addressed relative to the DM base.
pub trait DebugRegister: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// The register's DMI address offset.
    const ADDRESS: u8;
    /// The register's name.
    const NAME: &'static str;
}

macro_rules! data_register {
    ($(#[$attr:meta])* $vis:vis $name:ident, $address:expr, $reg_name:expr) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone)]
        $vis struct $name(pub u32);

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(register: $name) -> Self {
                register.0
            }
        }

        impl DebugRegister for $name {
            const ADDRESS: u8 = $address;
            const NAME: &'static str = $reg_name;
        }
    };
}

bitfield! {
    /// The `dmcontrol` register: hart selection and run control.
    #[derive(Copy, Clone, Default)]
    pub struct Dmcontrol(u32);
    impl Debug;
    /// Request the selected harts to halt.
    pub _, set_haltreq: 31;
    /// Request the selected harts to resume.
    pub _, set_resumereq: 30;
    /// Reset the selected harts.
    pub hartreset, set_hartreset: 29;
    /// Acknowledge a hart reset.
    pub _, set_ackhavereset: 28;
    /// Low ten bits of the hart selector.
    pub u16, hartsello, set_hartsello: 25, 16;
    /// High ten bits of the hart selector.
    pub u16, hartselhi, set_hartselhi: 15, 6;
    /// Non-debug-module reset.
    pub ndmreset, set_ndmreset: 1;
    /// The DM is active.
    pub dmactive, set_dmactive: 0;
}

impl Dmcontrol {
    /// The combined 20-bit hart selector.
    pub fn hartsel(&self) -> u32 {
        (u32::from(self.hartselhi()) << 10) | u32::from(self.hartsello())
    }

    /// Set the combined 20-bit hart selector.
    pub fn set_hartsel(&mut self, hartsel: u32) {
        self.set_hartsello((hartsel & 0x3ff) as u16);
        self.set_hartselhi(((hartsel >> 10) & 0x3ff) as u16);
    }
}

impl From<u32> for Dmcontrol {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dmcontrol> for u32 {
    fn from(register: Dmcontrol) -> Self {
        register.0
    }
}

impl DebugRegister for Dmcontrol {
    const ADDRESS: u8 = 0x10;
    const NAME: &'static str = "dmcontrol";
}

bitfield! {
    /// The read-only `dmstatus` register.
    #[derive(Copy, Clone)]
    pub struct Dmstatus(u32);
    impl Debug;
    /// ebreak in program buffers behaves as implicit.
    pub impebreak, _: 22;
    /// All selected harts have reset.
    pub allhavereset, _: 19;
    /// All selected harts acknowledged the last resume request.
    pub allresumeack, _: 17;
    /// The selected hart does not exist.
    pub anynonexistent, _: 14;
    /// All selected harts are unavailable.
    pub allunavail, _: 13;
    /// All selected harts are running.
    pub allrunning, _: 11;
    /// All selected harts are halted.
    pub allhalted, _: 9;
    /// The debugger is authenticated.
    pub authenticated, _: 7;
    /// The version of the debug module.
    pub u8, version, _: 3, 0;
}

impl From<u32> for Dmstatus {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dmstatus> for u32 {
    fn from(register: Dmstatus) -> Self {
        register.0
    }
}

impl DebugRegister for Dmstatus {
    const ADDRESS: u8 = 0x11;
    const NAME: &'static str = "dmstatus";
}

bitfield! {
    /// The `abstractcs` register: abstract command status.
    #[derive(Copy, Clone)]
    pub struct Abstractcs(u32);
    impl Debug;
    /// Number of program buffer words.
    pub u8, progbufsize, _: 28, 24;
    /// An abstract command is executing.
    pub busy, _: 12;
    /// The error from the last abstract command. Write-1-to-clear.
    pub u8, cmderr, set_cmderr: 10, 8;
    /// Number of implemented data registers.
    pub u8, datacount, _: 3, 0;
}

impl From<u32> for Abstractcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Abstractcs> for u32 {
    fn from(register: Abstractcs) -> Self {
        register.0
    }
}

impl DebugRegister for Abstractcs {
    const ADDRESS: u8 = 0x16;
    const NAME: &'static str = "abstractcs";
}

bitfield! {
    /// An access-register abstract command.
    #[derive(Copy, Clone, Default)]
    pub struct AccessRegisterCommand(u32);
    impl Debug;
    /// Command type; 0 for register access.
    pub u8, cmdtype, set_cmdtype: 31, 24;
    /// Access width: 2 = 32 bit, 3 = 64 bit, 4 = 128 bit.
    pub u8, aarsize, set_aarsize: 22, 20;
    /// Increment regno after the access.
    pub _, set_aarpostincrement: 19;
    /// Execute the program buffer afterwards.
    pub _, set_postexec: 18;
    /// Transfer data between regno and the data registers.
    pub _, set_transfer: 17;
    /// Direction: write regno from the data registers.
    pub _, set_write: 16;
    /// The register: CSR number, or 0x1000 + n for GPRs.
    pub u16, regno, set_regno: 15, 0;
}

impl From<u32> for AccessRegisterCommand {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<AccessRegisterCommand> for u32 {
    fn from(register: AccessRegisterCommand) -> Self {
        register.0
    }
}

impl DebugRegister for AccessRegisterCommand {
    const ADDRESS: u8 = 0x17;
    const NAME: &'static str = "command";
}

bitfield! {
    /// An access-memory abstract command.
    #[derive(Copy, Clone, Default)]
    pub struct AccessMemoryCommand(u32);
    impl Debug;
    /// Command type; 2 for memory access.
    pub u8, cmdtype, set_cmdtype: 31, 24;
    /// Use virtual addresses.
    pub _, set_aamvirtual: 23;
    /// Access width: 0 = 8 bit .. 4 = 128 bit.
    pub u8, aamsize, set_aamsize: 22, 20;
    /// Increment the address after the access.
    pub _, set_aampostincrement: 19;
    /// Direction: write memory from the data registers.
    pub _, set_write: 16;
}

impl From<u32> for AccessMemoryCommand {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<AccessMemoryCommand> for u32 {
    fn from(register: AccessMemoryCommand) -> Self {
        register.0
    }
}

impl DebugRegister for AccessMemoryCommand {
    const ADDRESS: u8 = 0x17;
    const NAME: &'static str = "command";
}

bitfield! {
    /// The `sbcs` register: system bus access control and status.
    #[derive(Copy, Clone, Default)]
    pub struct Sbcs(u32);
    impl Debug;
    /// System bus interface version.
    pub u8, sbversion, set_sbversion: 31, 29;
    /// A system bus access happened while one was in progress. Sticky.
    pub sbbusyerror, set_sbbusyerror: 22;
    /// A system bus access is in progress.
    pub sbbusy, _: 21;
    /// Reading sbaddress0 triggers a bus read.
    pub _, set_sbreadonaddr: 20;
    /// The width of bus accesses.
    pub u8, sbaccess, set_sbaccess: 19, 17;
    /// Increment the address after each access.
    pub _, set_sbautoincrement: 16;
    /// Reading sbdata0 triggers the next bus read.
    pub _, set_sbreadondata: 15;
    /// The error from the last bus access. Write-1-to-clear.
    pub u8, sberror, set_sberror: 14, 12;
    /// The width of bus addresses in bits.
    pub u8, sbasize, _: 11, 5;
    /// 64-bit accesses are supported.
    pub sbaccess64, _: 3;
    /// 32-bit accesses are supported.
    pub sbaccess32, _: 2;
    /// 16-bit accesses are supported.
    pub sbaccess16, _: 1;
    /// 8-bit accesses are supported.
    pub sbaccess8, _: 0;
}

impl From<u32> for Sbcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Sbcs> for u32 {
    fn from(register: Sbcs) -> Self {
        register.0
    }
}

impl DebugRegister for Sbcs {
    const ADDRESS: u8 = 0x38;
    const NAME: &'static str = "sbcs";
}

data_register!(
    /// Abstract command data register 0.
    pub Data0, 0x04, "data0"
);
data_register!(
    /// Abstract command data register 1.
    pub Data1, 0x05, "data1"
);
data_register!(
    /// Abstract command data register 2.
    pub Data2, 0x06, "data2"
);
data_register!(
    /// Abstract command data register 3.
    pub Data3, 0x07, "data3"
);
data_register!(
    /// The DMI address of the next DM in the chain, zero on the last.
    pub NextDm, 0x1d, "nextdm"
);
data_register!(
    /// System bus address, low word.
    pub Sbaddress0, 0x39, "sbaddress0"
);
data_register!(
    /// System bus address, high word.
    pub Sbaddress1, 0x3a, "sbaddress1"
);
data_register!(
    /// System bus data, low word.
    pub Sbdata0, 0x3c, "sbdata0"
);
data_register!(
    /// System bus data, high word.
    pub Sbdata1, 0x3d, "sbdata1"
);

/// The version of a Debug Module, classified from `dmstatus`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DebugModuleVersion {
    /// No DM at this address.
    Unimplemented,
    /// Debug specification 0.11. Reported but not supported.
    V0_11,
    /// Debug specification 0.13.
    V0_13,
    /// Debug specification 1.0.
    V1_0,
    /// An unknown version field.
    Unknown(u8),
}

impl DebugModuleVersion {
    fn from_status(status: Dmstatus) -> Self {
        match status.version() {
            0 => DebugModuleVersion::Unimplemented,
            1 => DebugModuleVersion::V0_11,
            2 => DebugModuleVersion::V0_13,
            3 => DebugModuleVersion::V1_0,
            other => DebugModuleVersion::Unknown(other),
        }
    }
}

/// Errors reported by the abstract command engine, from `abstractcs.cmderr`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, enum_primitive_derive::Primitive)]
pub enum AbstractCommandErrorKind {
    /// No error.
    None = 0,
    /// A command was issued while one was executing.
    Busy = 1,
    /// The command is not supported.
    NotSupported = 2,
    /// An exception occurred while executing the command.
    Exception = 3,
    /// The hart is in the wrong state for the command.
    HaltResume = 4,
    /// The command triggered a bus error.
    Bus = 5,
    /// Any other failure.
    Other = 7,
}

/// The shared DMI bus handle.
///
/// Reference counted by every Debug Module and hart driver created on it;
/// the transport is released with the last clone.
#[derive(Clone)]
pub struct RiscvCommunicationInterface {
    bus: Rc<RefCell<DmiBus>>,
}

struct DmiBus {
    transport: Box<dyn DmiTransport>,
}

impl std::fmt::Debug for RiscvCommunicationInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiscvCommunicationInterface").finish()
    }
}

impl RiscvCommunicationInterface {
    /// Wrap a DMI transport.
    pub fn new(transport: Box<dyn DmiTransport>) -> Self {
        Self {
            bus: Rc::new(RefCell::new(DmiBus { transport })),
        }
    }

    pub(crate) fn read_dmi(&self, address: u32) -> Result<u32, RiscvError> {
        let value = self.bus.borrow_mut().transport.read(address)?;
        tracing::trace!("DMI read {address:#04x} = {value:#010x}");
        Ok(value)
    }

    pub(crate) fn write_dmi(&self, address: u32, value: u32) -> Result<(), RiscvError> {
        tracing::trace!("DMI write {address:#04x} = {value:#010x}");
        self.bus.borrow_mut().transport.write(address, value)?;
        Ok(())
    }

    /// Walk the Debug Module chain starting at DMI address 0.
    ///
    /// Each implemented DM is activated and returned; the chain ends when
    /// the next-DM pointer reads zero. A failing read aborts the walk with
    /// whatever was found so far.
    pub fn enumerate_debug_modules(&self) -> Result<Vec<DebugModule>, RiscvError> {
        let mut modules = Vec::new();
        let mut base = 0u32;

        loop {
            let status = match self.read_dmi(base + u32::from(Dmstatus::ADDRESS)) {
                Ok(raw) => Dmstatus(raw),
                Err(error) => {
                    tracing::info!("Error reading DM status at {base:#x}: {error}");
                    break;
                }
            };

            let version = DebugModuleVersion::from_status(status);
            match version {
                DebugModuleVersion::Unimplemented => {}
                DebugModuleVersion::V0_11 => {
                    tracing::info!("RISC-V debug v0.11 DM at {base:#x} is not supported");
                }
                DebugModuleVersion::Unknown(raw) => {
                    tracing::warn!("DM at {base:#x} has unknown debug version {raw}");
                }
                DebugModuleVersion::V0_13 | DebugModuleVersion::V1_0 => {
                    tracing::debug!("Found {version:?} DM at {base:#x}");
                    let module = DebugModule {
                        interface: self.clone(),
                        base,
                        version,
                    };
                    module.activate()?;
                    modules.push(module);
                }
            }

            base = match self.read_dmi(base + u32::from(NextDm::ADDRESS)) {
                Ok(next) => next,
                Err(error) => {
                    tracing::info!("Error reading the next DM address: {error}");
                    break;
                }
            };
            // A pointer of zero marks the last DM on the chain.
            if base == 0 {
                break;
            }
        }

        Ok(modules)
    }
}

/// One Debug Module on the DMI bus.
#[derive(Debug, Clone)]
pub struct DebugModule {
    interface: RiscvCommunicationInterface,
    base: u32,
    version: DebugModuleVersion,
}

impl DebugModule {
    /// The DM's base address on the DMI bus.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// The DM's debug specification version.
    pub fn version(&self) -> DebugModuleVersion {
        self.version
    }

    /// Read a typed DM register.
    pub fn read_register<R: DebugRegister>(&self) -> Result<R, RiscvError> {
        let raw = self
            .interface
            .read_dmi(self.base + u32::from(R::ADDRESS))?;
        Ok(raw.into())
    }

    /// Write a typed DM register.
    pub fn write_register<R: DebugRegister>(&self, register: R) -> Result<(), RiscvError> {
        self.interface
            .write_dmi(self.base + u32::from(R::ADDRESS), register.into())
    }

    fn activate(&self) -> Result<(), RiscvError> {
        let mut control = Dmcontrol::default();
        control.set_dmactive(true);
        self.write_register(control)
    }

    /// Select a hart, asserting the given run-control request bits.
    pub(crate) fn select_hart(&self, hartsel: u32) -> Result<Dmcontrol, RiscvError> {
        let mut control = Dmcontrol::default();
        control.set_dmactive(true);
        control.set_hartsel(hartsel);
        self.write_register(control)?;
        Ok(control)
    }

    /// Find out how many hart selector bits are implemented by writing the
    /// selector with all ones and reading it back.
    pub(crate) fn max_hart_index(&self) -> Result<u32, RiscvError> {
        let mut control = Dmcontrol::default();
        control.set_dmactive(true);
        control.set_hartsel(0xfffff);
        self.write_register(control)?;
        let control: Dmcontrol = self.read_register()?;
        Ok(control.hartsel())
    }

    /// Run one abstract command to completion.
    pub(crate) fn run_abstract_command(&self, command: u32) -> Result<(), RiscvError> {
        self.interface
            .write_dmi(self.base + u32::from(AccessRegisterCommand::ADDRESS), command)?;

        let start = Instant::now();
        let status = loop {
            let status: Abstractcs = self.read_register()?;
            if !status.busy() {
                break status;
            }
            if start.elapsed() >= RISCV_TIMEOUT {
                return Err(RiscvError::Timeout);
            }
        };

        let cmderr = status.cmderr();
        if cmderr != 0 {
            // cmderr is sticky; clear it so the next command starts clean.
            let mut clear = Abstractcs(0);
            clear.set_cmderr(0b111);
            self.write_register(clear)?;
            let kind = AbstractCommandErrorKind::from_u8(cmderr)
                .unwrap_or(AbstractCommandErrorKind::Other);
            return Err(RiscvError::AbstractCommand(kind));
        }
        Ok(())
    }

    /// Read a register through an abstract access-register command.
    ///
    /// `regno` is a CSR number or 0x1000 + n for GPRs; `aarsize` is the
    /// access width exponent (2 = 32 bit, 3 = 64 bit).
    pub(crate) fn abstract_register_read(
        &self,
        regno: u16,
        aarsize: u8,
    ) -> Result<u64, RiscvError> {
        let mut command = AccessRegisterCommand::default();
        command.set_transfer(true);
        command.set_aarsize(aarsize);
        command.set_regno(regno);
        self.run_abstract_command(command.into())?;

        let mut value = u64::from(self.read_register::<Data0>()?.0);
        if aarsize >= 3 {
            value |= u64::from(self.read_register::<Data1>()?.0) << 32;
        }
        Ok(value)
    }

    /// Write a register through an abstract access-register command.
    pub(crate) fn abstract_register_write(
        &self,
        regno: u16,
        aarsize: u8,
        value: u64,
    ) -> Result<(), RiscvError> {
        self.write_register(Data0(value as u32))?;
        if aarsize >= 3 {
            self.write_register(Data1((value >> 32) as u32))?;
        }

        let mut command = AccessRegisterCommand::default();
        command.set_transfer(true);
        command.set_write(true);
        command.set_aarsize(aarsize);
        command.set_regno(regno);
        self.run_abstract_command(command.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    /// A fake DMI bus with two chained DMs.
    struct FakeDmi {
        registers: HashMap<u32, u32>,
    }

    impl DmiTransport for Rc<RefCell<FakeDmi>> {
        fn read(&mut self, address: u32) -> Result<u32, DebugProbeError> {
            Ok(*self.borrow().registers.get(&address).unwrap_or(&0))
        }

        fn write(&mut self, address: u32, value: u32) -> Result<(), DebugProbeError> {
            self.borrow_mut().registers.insert(address, value);
            Ok(())
        }
    }

    #[test]
    fn dm_chain_walk_follows_next_dm_until_zero() {
        let mut registers = HashMap::new();
        // DM at 0: v0.13, next DM at 0x400.
        registers.insert(0x11, 2);
        registers.insert(0x1d, 0x400);
        // DM at 0x400: v1.0, end of chain.
        registers.insert(0x400 + 0x11, 3);
        registers.insert(0x400 + 0x1d, 0);
        let dmi = Rc::new(RefCell::new(FakeDmi { registers }));

        let interface = RiscvCommunicationInterface::new(Box::new(dmi.clone()));
        let modules = interface.enumerate_debug_modules().unwrap();

        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].base(), 0);
        assert_eq!(modules[0].version(), DebugModuleVersion::V0_13);
        assert_eq!(modules[1].base(), 0x400);
        assert_eq!(modules[1].version(), DebugModuleVersion::V1_0);
        // Both DMs were activated.
        assert_eq!(dmi.borrow().registers[&0x10] & 1, 1);
        assert_eq!(dmi.borrow().registers[&(0x400 + 0x10)] & 1, 1);
    }

    #[test]
    fn unimplemented_dm_is_skipped() {
        let mut registers = HashMap::new();
        // Version 0: nothing here, and the chain ends immediately.
        registers.insert(0x11, 0);
        registers.insert(0x1d, 0);
        let dmi = Rc::new(RefCell::new(FakeDmi { registers }));

        let interface = RiscvCommunicationInterface::new(Box::new(dmi));
        let modules = interface.enumerate_debug_modules().unwrap();
        assert!(modules.is_empty());
    }

    #[test]
    fn hartsel_field_packs_and_unpacks() {
        let mut control = Dmcontrol::default();
        control.set_hartsel(0xabcde >> 2);
        assert_eq!(control.hartsel(), 0xabcde >> 2);
    }

    #[test]
    fn abstract_command_error_is_classified_and_cleared() {
        let mut registers = HashMap::new();
        // abstractcs: not busy, cmderr = 2 (not supported).
        registers.insert(0x16, 2 << 8);
        let dmi = Rc::new(RefCell::new(FakeDmi { registers }));

        let interface = RiscvCommunicationInterface::new(Box::new(dmi.clone()));
        let module = DebugModule {
            interface,
            base: 0,
            version: DebugModuleVersion::V0_13,
        };

        let result = module.abstract_register_read(0x301, 2);
        assert!(matches!(
            result,
            Err(RiscvError::AbstractCommand(
                AbstractCommandErrorKind::NotSupported
            ))
        ));
        // The sticky cmderr field was written back to clear it.
        assert_eq!(dmi.borrow().registers[&0x16] & (0b111 << 8), 0b111 << 8);
    }
}
