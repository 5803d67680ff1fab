//! Scan orchestration and the target list.

use crate::architecture::arm::ap::v1::scan_access_ports;
use crate::architecture::arm::ap::v2::{access_port_at, RootMemoryInterface};
use crate::architecture::arm::ap::MemoryAp;
use crate::architecture::arm::communication_interface::DapAccess;
use crate::architecture::arm::core::cortex_ar::{CortexAR, CortexArFamily};
use crate::architecture::arm::core::cortex_m::CortexM;
use crate::architecture::arm::dp::DebugPortVersion;
use crate::architecture::arm::romtable::{ComponentWalker, DiscoveredComponent};
use crate::architecture::arm::{ArmCommunicationInterface, DpAddress};
use crate::architecture::riscv::communication_interface::RiscvCommunicationInterface;
use crate::architecture::riscv::{enumerate_harts, Riscv};
use crate::core::Target;
use crate::error::Error;
use crate::probe::DapTransport;

enum SessionInterface {
    Arm(ArmCommunicationInterface),
    Riscv(RiscvCommunicationInterface),
}

/// A debug session: one attached transport and the targets found on it.
///
/// Dropping the session (or rescanning) tears down every target; the
/// targets keep the AP/DP ownership chain alive, so the transport is only
/// released when the session and all targets are gone.
pub struct Session {
    interface: SessionInterface,
    targets: Vec<Target>,
}

impl Session {
    /// Attach to an ARM debug port and discover everything debuggable on
    /// it.
    ///
    /// `jtag_idcode` carries the TAP IDCODE when the transport is JTAG, to
    /// recognise fixed DPv0 JTAG-DPs whose DPIDR must not be read.
    pub fn attach_arm(
        transport: Box<dyn DapTransport>,
        dp: DpAddress,
        jtag_idcode: Option<u32>,
    ) -> Result<Self, Error> {
        let interface = ArmCommunicationInterface::connect(transport, dp, jtag_idcode)?;
        let mut session = Self {
            interface: SessionInterface::Arm(interface),
            targets: Vec::new(),
        };
        session.scan()?;
        Ok(session)
    }

    /// Attach to a RISC-V DMI bus and discover its Debug Modules and
    /// harts.
    pub fn attach_riscv(
        transport: Box<dyn crate::architecture::riscv::communication_interface::DmiTransport>,
    ) -> Result<Self, Error> {
        let interface = RiscvCommunicationInterface::new(transport);
        let mut session = Self {
            interface: SessionInterface::Riscv(interface),
            targets: Vec::new(),
        };
        session.scan()?;
        Ok(session)
    }

    /// The discovered targets.
    pub fn targets(&mut self) -> &mut [Target] {
        &mut self.targets
    }

    /// Tear every target down and run discovery again.
    ///
    /// Every previously handed out target handle is invalidated; the AP
    /// records they held are released before the new scan starts.
    pub fn rescan(&mut self) -> Result<(), Error> {
        self.targets.clear();
        self.scan()
    }

    fn scan(&mut self) -> Result<(), Error> {
        match &mut self.interface {
            SessionInterface::Arm(interface) => {
                let interface = interface.clone();
                self.targets = scan_arm(interface)?;
            }
            SessionInterface::Riscv(interface) => {
                let interface = interface.clone();
                self.targets = scan_riscv(&interface)?;
            }
        }
        if self.targets.is_empty() {
            tracing::info!("Scan found nothing debuggable");
        }
        Ok(())
    }
}

/// Discover the targets on one ARM DP.
fn scan_arm(mut interface: ArmCommunicationInterface) -> Result<Vec<Target>, Error> {
    let dp = interface.dp_address();
    let mut access_ports = Vec::new();

    if interface.debug_port_version() == DebugPortVersion::DPv3 {
        // ADIv6: no APSEL space to iterate. The DP advertises one root
        // resource address; MEM-APv2s are found by walking the ROM table
        // there.
        let Some(root) = interface.read_base_address()? else {
            return Ok(Vec::new());
        };
        let mut root_memory = RootMemoryInterface::new(interface.clone());
        match ComponentWalker::new(&mut root_memory).walk(root) {
            Ok(result) => {
                for component in result.components {
                    if let DiscoveredComponent::MemoryAccessPort { resource_address } = component {
                        if let Some(ap) = access_port_at(&mut interface, dp, resource_address)? {
                            access_ports.push(ap);
                        }
                    }
                }
            }
            Err(error) => {
                tracing::warn!("Root ROM table walk failed: {error}");
            }
        }
    } else {
        let quirk_interface = interface.clone();
        access_ports = scan_access_ports(&mut interface, dp, || {
            quirk_interface.set_duplicated_ap_quirk()
        })?;
    }

    let mut targets = Vec::new();
    for ap in access_ports {
        let ap_address = ap.address;
        let mut memory = MemoryAp::new(interface.clone(), ap);
        if memory.base_address() == 0 {
            continue;
        }

        // Clean any sticky fault a previous AP's walk left behind before
        // touching this one.
        if interface.dp_error()? {
            tracing::debug!("Cleared sticky error before walking AP {ap_address:?}");
        }

        let base_address = memory.base_address();
        let walk = match ComponentWalker::new(&mut memory).walk(base_address) {
            Ok(walk) => walk,
            Err(error) => {
                // Structural problem on this AP's ROM tables: fewer
                // targets, not a failed session.
                tracing::warn!("Abandoning AP {ap_address:?}: {error}");
                continue;
            }
        };
        if walk.has_sysmem {
            memory.set_has_mem();
        }

        for component in walk.components {
            match component {
                DiscoveredComponent::CortexM => {
                    match CortexM::new(Box::new(memory.clone())) {
                        Ok(core) => targets.push(Target::new("ARM Cortex-M", Box::new(core))),
                        Err(error) => tracing::warn!("Cortex-M probe failed: {error}"),
                    }
                }
                DiscoveredComponent::CortexA { base } => {
                    match CortexAR::new(Box::new(memory.clone()), base, CortexArFamily::CortexA) {
                        Ok(core) => targets.push(Target::new("ARM Cortex-A", Box::new(core))),
                        Err(error) => tracing::warn!("Cortex-A probe failed: {error}"),
                    }
                }
                DiscoveredComponent::CortexR { base } => {
                    match CortexAR::new(Box::new(memory.clone()), base, CortexArFamily::CortexR) {
                        Ok(core) => targets.push(Target::new("ARM Cortex-R", Box::new(core))),
                        Err(error) => tracing::warn!("Cortex-R probe failed: {error}"),
                    }
                }
                DiscoveredComponent::MemoryAccessPort { .. } => {
                    // Nested AP buses only exist on ADIv6 and were handled
                    // by the root walk.
                }
            }
        }
    }

    Ok(targets)
}

/// Discover the harts on a RISC-V DMI bus.
fn scan_riscv(interface: &RiscvCommunicationInterface) -> Result<Vec<Target>, Error> {
    let mut targets = Vec::new();
    for module in interface.enumerate_debug_modules()? {
        let harts = match enumerate_harts(&module) {
            Ok(harts) => harts,
            Err(error) => {
                tracing::warn!(
                    "Hart discovery failed on DM at {:#x}: {error}",
                    module.base()
                );
                continue;
            }
        };
        for hart in harts {
            match Riscv::new(module.clone(), hart) {
                Ok(core) => {
                    let name = core.name();
                    targets.push(Target::new(name, Box::new(core)));
                }
                Err(error) => tracing::warn!("Skipping hart: {error}"),
            }
        }
    }
    Ok(targets)
}
