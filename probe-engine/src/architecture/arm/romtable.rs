//! CoreSight component identification and the recursive ROM table walk.

use super::communication_interface::ADI_TIMEOUT;
use super::component::{
    adjust_cid_class, designer_from_pidr, designer_name, lookup_component, ArmArchitecture,
    CidClass, PIDR_PART_MASK, PIDR_SIZE_MASK,
};
use super::{component::designer, ArmError, ArmMemoryInterface};
use std::time::Instant;
use thiserror::Error;

/// Errors during CoreSight discovery.
#[derive(Debug, Error)]
pub enum RomTableError {
    /// The component's CIDR preamble did not match.
    #[error("Component at {0:#x} does not have a valid CIDR preamble")]
    InvalidPreamble(u64),
    /// A ROM-table classed component has a non-zero PIDR SIZE field. The
    /// table is never read in this state.
    #[error("ROM table at {0:#x} has a non-zero PIDR SIZE field")]
    SizeFieldSet(u64),
    /// Memory access through the AP failed.
    #[error("Could not access the component")]
    Memory(#[source] Box<ArmError>),
}

impl From<ArmError> for RomTableError {
    fn from(error: ArmError) -> Self {
        RomTableError::Memory(Box::new(error))
    }
}

// Component and peripheral identification register offsets.
const CIDR0_OFFSET: u64 = 0xFF0;
const PIDR0_OFFSET: u64 = 0xFE0;
const PIDR4_OFFSET: u64 = 0xFD0;

const CID_PREAMBLE: u32 = 0xB105_000D;
const CID_CLASS_MASK: u32 = 0x0000_F000;
const CID_CLASS_SHIFT: u32 = 12;

// Legacy (class 0x1) ROM table registers.
const ROM_MEMTYPE: u64 = 0xFCC;
const ROM_MEMTYPE_SYSMEM: u32 = 1 << 0;
const ROM_ENTRY_PRESENT: u32 = 1 << 0;
/// Legacy tables have at most 960 entries; the remaining space holds the
/// identification registers.
const ROM_MAX_ENTRIES: u32 = 960;

// CoreSight (class 0x9) component registers.
const CORESIGHT_DEVARCH: u64 = 0xFBC;
const CORESIGHT_DEVID: u64 = 0xFC8;
const CORESIGHT_DEVTYPE: u64 = 0xFCC;
const DEVARCH_PRESENT: u32 = 1 << 20;
const DEVARCH_ARCHID_MASK: u32 = 0xFFFF;
const DEVTYPE_MASK: u32 = 0xFF;

// CoreSight v0 ROM table registers.
const CS_ROM_DEVID_FORMAT_64BIT: u32 = 1 << 0;
const CS_ROM_DEVID_SYSMEM: u32 = 1 << 4;
const CS_ROM_DEVID_HAS_POWERREQ: u32 = 1 << 5;
const CS_ROM_PRIDR0: u64 = 0xC00;
const CS_ROM_PRIDR0_VERSION_MASK: u32 = 0xF;
const CS_ROM_PRIDR0_HAS_DBG_RESET_REQ: u32 = 1 << 4;
const CS_ROM_DBGRSTRR: u64 = 0xC10;
const CS_ROM_DBGRSTAR: u64 = 0xC14;
const CS_ROM_DBGRST_REQ: u32 = 1 << 0;
const CS_ROM_DBGPCR_BASE: u64 = 0xA00;
const CS_ROM_DBGPCR_PRESENT: u32 = 1 << 0;
const CS_ROM_DBGPCR_PWRREQ: u32 = 1 << 1;
const CS_ROM_DBGPSR_BASE: u64 = 0xA80;
const CS_ROM_DBGPSR_STATUS_ON: u32 = 1 << 0;
const CS_ROM_ENTRY_FINAL: u64 = 0;
const CS_ROM_ENTRY_INVALID: u64 = 1;
const CS_ROM_ENTRY_NOT_PRESENT: u64 = 2;
const CS_ROM_ENTRY_MASK: u64 = 0x3;
const CS_ROM_ENTRY_POWERID_VALID: u64 = 1 << 2;
const CS_ROM_ENTRY_POWERID_SHIFT: u64 = 4;
const CS_ROM_ENTRY_POWERID_MASK: u64 = 0x1f << CS_ROM_ENTRY_POWERID_SHIFT;
const CS_ROM_ENTRY_OFFSET_MASK: u64 = 0xffff_ffff_ffff_f000;
/// CoreSight v0 tables have at most 512 32-bit or 256 64-bit entries.
const CS_ROM_MAX_ENTRIES_32: u32 = 512;
const CS_ROM_MAX_ENTRIES_64: u32 = 256;

/// A debuggable resource found by the walk, to be attached to a core
/// driver by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveredComponent {
    /// A Cortex-M system control space. The core is reached through the
    /// AP's memory at the architected SCS addresses.
    CortexM,
    /// A Cortex-A debug unit at this base address.
    CortexA {
        /// Debug register file base address.
        base: u64,
    },
    /// A Cortex-R debug unit at this base address.
    CortexR {
        /// Debug register file base address.
        base: u64,
    },
    /// An ADIv6 MEM-APv2 at this resource bus address.
    MemoryAccessPort {
        /// The AP's address on the DP resource bus.
        resource_address: u64,
    },
}

/// The decoded identification registers of one component.
#[derive(Debug, Clone)]
pub struct ComponentId {
    /// The component's base address.
    pub address: u64,
    /// The advertised component class.
    pub cid_class: CidClass,
    /// The raw 64-bit PIDR value.
    pub pidr: u64,
    /// The packed designer code extracted from the PIDR.
    pub designer: u16,
    /// The 12-bit part number.
    pub part: u16,
}

/// Read the four spread-out ID register bytes that make up one logical
/// 32-bit identification word.
fn read_id_word(
    memory: &mut (impl ArmMemoryInterface + ?Sized),
    address: u64,
) -> Result<u32, ArmError> {
    let mut words = [0u32; 4];
    memory.read_32(address, &mut words)?;
    let mut value = 0;
    for (index, word) in words.iter().enumerate() {
        value |= (word & 0xff) << (index * 8);
    }
    Ok(value)
}

/// Read and validate a component's CIDR/PIDR block.
pub fn read_component_id(
    memory: &mut (impl ArmMemoryInterface + ?Sized),
    base_address: u64,
) -> Result<ComponentId, RomTableError> {
    let cidr = read_id_word(memory, base_address + CIDR0_OFFSET)?;

    if cidr & !CID_CLASS_MASK != CID_PREAMBLE {
        tracing::warn!(
            "Component at {base_address:#x}: CIDR {cidr:#010x} does not match the preamble"
        );
        return Err(RomTableError::InvalidPreamble(base_address));
    }
    let cid_class = CidClass::from(((cidr & CID_CLASS_MASK) >> CID_CLASS_SHIFT) as u8);

    let pidr_upper = read_id_word(memory, base_address + PIDR4_OFFSET)?;
    let pidr_lower = read_id_word(memory, base_address + PIDR0_OFFSET)?;
    let pidr = (u64::from(pidr_upper) << 32) | u64::from(pidr_lower);

    Ok(ComponentId {
        address: base_address,
        cid_class,
        pidr,
        designer: designer_from_pidr(pidr),
        part: (pidr & PIDR_PART_MASK) as u16,
    })
}

/// The recursive CoreSight walker.
///
/// Walks top-down from an AP's debug base address, identifying components
/// and collecting everything debuggable. Faulting branches are abandoned
/// with a diagnostic; only a fault on the root component itself fails the
/// walk.
pub struct ComponentWalker<'memory, M: ArmMemoryInterface + ?Sized> {
    memory: &'memory mut M,
    discovered: Vec<DiscoveredComponent>,
    /// The walk found system memory behind this AP (MEMTYPE/DEVID SYSMEM).
    has_sysmem: bool,
    /// The root table advertised power control registers.
    has_pwrctrl: bool,
    /// Designer/part of the root component, recorded at depth 0.
    root_id: Option<(u16, u16)>,
    /// Base addresses of the tables on the current recursion path, to cut
    /// reference cycles between tables.
    path: Vec<u64>,
}

/// The outcome of a completed walk.
#[derive(Debug)]
pub struct WalkResult {
    /// Everything debuggable that was found.
    pub components: Vec<DiscoveredComponent>,
    /// Whether system memory is accessible behind the AP.
    pub has_sysmem: bool,
    /// Designer/part of the root component, when identified.
    pub root_id: Option<(u16, u16)>,
}

impl<'memory, M: ArmMemoryInterface + ?Sized> ComponentWalker<'memory, M> {
    /// Create a walker reading through the given AP memory interface.
    pub fn new(memory: &'memory mut M) -> Self {
        Self {
            memory,
            discovered: Vec::new(),
            has_sysmem: false,
            has_pwrctrl: false,
            root_id: None,
            path: Vec::new(),
        }
    }

    /// Walk from the AP's base address and collect the results.
    pub fn walk(mut self, base_address: u64) -> Result<WalkResult, RomTableError> {
        self.probe(base_address, 0, 0)?;
        Ok(WalkResult {
            components: self.discovered,
            has_sysmem: self.has_sysmem,
            root_id: self.root_id,
        })
    }

    /// Identify and dispatch the component at `base_address`.
    fn probe(
        &mut self,
        base_address: u64,
        recursion: usize,
        entry_number: u32,
    ) -> Result<(), RomTableError> {
        let base_address = base_address & !3;
        let indent = " ".repeat(recursion);

        let component = read_component_id(self.memory, base_address)?;
        tracing::debug!(
            "{indent}{entry_number} {base_address:#010x}: {} (PIDR = {:#018x})",
            component.cid_class.description(),
            component.pidr,
        );

        if component.cid_class == CidClass::RomTable {
            // The SIZE field must be zero on a ROM table; a non-zero value
            // means the identification read is not to be trusted and the
            // table must not be walked.
            if component.pidr & PIDR_SIZE_MASK != 0 {
                tracing::error!("{indent}Fault reading ROM table at {base_address:#x}");
                return Err(RomTableError::SizeFieldSet(base_address));
            }
            if recursion == 0 {
                self.root_id = Some((component.designer, component.part));
            }
            return self.parse_legacy_rom_table(base_address, recursion);
        }

        if component.designer != designer::ARM && component.designer != designer::ARM_CHINA {
            tracing::warn!(
                "{indent}{entry_number} {base_address:#010x}: non-ARM component ignored (designer {:#05x} {})",
                component.designer,
                designer_name(component.designer).unwrap_or("unknown"),
            );
            return Ok(());
        }

        // DEVTYPE and DEVARCH only exist on CoreSight debug components.
        let mut dev_type = 0u8;
        let mut arch_id = 0u16;
        if component.cid_class == CidClass::DebugComponent {
            let devarch = self.memory.read_word_32(base_address + CORESIGHT_DEVARCH)?;
            dev_type = (self.memory.read_word_32(base_address + CORESIGHT_DEVTYPE)? & DEVTYPE_MASK)
                as u8;
            if devarch & DEVARCH_PRESENT != 0 {
                arch_id = (devarch & DEVARCH_ARCHID_MASK) as u16;
            }
        }

        let Some(entry) = lookup_component(component.part, dev_type, arch_id) else {
            tracing::warn!(
                "{indent}{entry_number} {base_address:#010x}: unknown component \
                 (PIDR = {:#018x} DEVTYPE = {dev_type:#04x} ARCHID = {arch_id:#06x})",
                component.pidr,
            );
            return Ok(());
        };

        tracing::info!(
            "{indent}{entry_number} {base_address:#010x}: {} {}",
            entry.name,
            entry.description
        );

        let adjusted = adjust_cid_class(component.part, arch_id, component.cid_class);
        if let Some(expected) = entry.expected_class {
            if adjusted != expected {
                tracing::warn!(
                    "{indent}\"{}\" expected, got \"{}\"",
                    expected.description(),
                    adjusted.description()
                );
            }
        }

        match entry.arch {
            ArmArchitecture::CortexM => {
                self.discovered.push(DiscoveredComponent::CortexM);
            }
            ArmArchitecture::CortexA => {
                self.discovered.push(DiscoveredComponent::CortexA { base: base_address });
            }
            ArmArchitecture::CortexR => {
                self.discovered.push(DiscoveredComponent::CortexR { base: base_address });
            }
            ArmArchitecture::AccessPort => {
                self.discovered.push(DiscoveredComponent::MemoryAccessPort {
                    resource_address: base_address,
                });
            }
            ArmArchitecture::RomTable => {
                if component.pidr & PIDR_SIZE_MASK != 0 {
                    tracing::error!("{indent}Fault reading ROM table at {base_address:#x}");
                    return Err(RomTableError::SizeFieldSet(base_address));
                }
                if recursion == 0 {
                    self.root_id = Some((component.designer, component.part));
                }
                self.parse_coresight_rom_table(base_address, recursion)?;
            }
            ArmArchitecture::NoSupport => {}
        }

        Ok(())
    }

    /// Probe one ROM table entry, abandoning the branch on structural
    /// faults instead of failing the walk.
    fn probe_entry(&mut self, address: u64, recursion: usize, entry_number: u32) {
        if self.path.contains(&(address & !3)) {
            tracing::warn!(
                "ROM table entry {entry_number} points back at {address:#x}, ignoring the cycle"
            );
            return;
        }
        if let Err(error) = self.probe(address, recursion, entry_number) {
            tracing::warn!("Abandoning branch at {address:#x}: {error}");
        }
    }

    /// Walk a legacy (class 0x1, ADIv5) ROM table: 32-bit entries only.
    fn parse_legacy_rom_table(
        &mut self,
        base_address: u64,
        recursion: usize,
    ) -> Result<(), RomTableError> {
        let indent = " ".repeat(recursion);

        let memtype = self.memory.read_word_32(base_address + ROM_MEMTYPE)?;
        if memtype & ROM_MEMTYPE_SYSMEM != 0 {
            self.has_sysmem = true;
        }
        tracing::info!(
            "{indent}ROM Table: BASE={base_address:#x} SYSMEM={}",
            memtype & ROM_MEMTYPE_SYSMEM
        );

        self.path.push(base_address);
        for index in 0..ROM_MAX_ENTRIES {
            let entry = match self.memory.read_word_32(base_address + u64::from(index) * 4) {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::error!("{indent}Fault reading ROM table entry {index}: {error}");
                    break;
                }
            };

            // The all-zero entry marks the end of the table.
            if entry == 0 {
                break;
            }
            if entry & ROM_ENTRY_PRESENT == 0 {
                tracing::info!("{indent}{index} Entry {entry:#010x} -> Not present");
                continue;
            }

            // The offset field is signed.
            let offset = i64::from((entry & 0xffff_f000) as i32);
            let address = base_address.wrapping_add_signed(offset);
            self.probe_entry(address, recursion + 1, index);
        }
        self.path.pop();

        tracing::info!("{indent}ROM Table: END");
        Ok(())
    }

    /// Walk a CoreSight v0 (class 0x9) ROM table: 32- or 64-bit entries,
    /// optional power control.
    fn parse_coresight_rom_table(
        &mut self,
        base_address: u64,
        recursion: usize,
    ) -> Result<(), RomTableError> {
        let indent = " ".repeat(recursion);

        let dev_id = self.memory.read_word_32(base_address + CORESIGHT_DEVID)? & 0x7f;
        if dev_id & CS_ROM_DEVID_SYSMEM != 0 {
            self.has_sysmem = true;
        }
        let format_64bit = dev_id & CS_ROM_DEVID_FORMAT_64BIT != 0;

        if dev_id & CS_ROM_DEVID_HAS_POWERREQ != 0 {
            self.reset_resources(base_address)?;
        }

        tracing::info!("{indent}ROM Table: BASE={base_address:#x} (CoreSight v0)");

        let (max_entries, entry_shift) = if format_64bit {
            (CS_ROM_MAX_ENTRIES_64, 3u64)
        } else {
            (CS_ROM_MAX_ENTRIES_32, 2u64)
        };

        self.path.push(base_address);
        for index in 0..max_entries {
            let entry_address = base_address + (u64::from(index) << entry_shift);
            let entry = match self.read_coresight_rom_entry(format_64bit, entry_address) {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::error!("{indent}Fault reading ROM table entry {index}: {error}");
                    break;
                }
            };

            match entry & CS_ROM_ENTRY_MASK {
                CS_ROM_ENTRY_FINAL => break,
                CS_ROM_ENTRY_INVALID => {
                    tracing::info!("{indent}{index} Entry invalid");
                    continue;
                }
                CS_ROM_ENTRY_NOT_PRESENT => {
                    tracing::info!("{indent}{index} Entry {entry:#x} -> Not present");
                    continue;
                }
                _ => {}
            }

            // Power the entry's domain up before touching the component.
            if self.has_pwrctrl && entry & CS_ROM_ENTRY_POWERID_VALID != 0 {
                let domain_offset =
                    ((entry & CS_ROM_ENTRY_POWERID_MASK) >> CS_ROM_ENTRY_POWERID_SHIFT) << 2;
                if !self.power_up_domain(base_address, domain_offset)? {
                    self.path.pop();
                    return Ok(());
                }
            }

            let offset = entry & CS_ROM_ENTRY_OFFSET_MASK;
            self.probe_entry(base_address.wrapping_add(offset), recursion + 1, index);
        }
        self.path.pop();

        tracing::info!("{indent}ROM Table: END");
        Ok(())
    }

    fn read_coresight_rom_entry(
        &mut self,
        format_64bit: bool,
        entry_address: u64,
    ) -> Result<u64, ArmError> {
        let lower = self.memory.read_word_32(entry_address)?;
        if !format_64bit {
            return Ok(u64::from(lower));
        }
        let upper = self.memory.read_word_32(entry_address + 4)?;
        Ok((u64::from(upper) << 32) | u64::from(lower))
    }

    /// Check for power control support and issue a debug reset request.
    fn reset_resources(&mut self, base_address: u64) -> Result<(), RomTableError> {
        let pridr0 = self.memory.read_word_32(base_address + CS_ROM_PRIDR0)? & 0x3f;
        if pridr0 & CS_ROM_PRIDR0_VERSION_MASK != 0 {
            self.has_pwrctrl = true;
        }

        if pridr0 & CS_ROM_PRIDR0_HAS_DBG_RESET_REQ != 0 {
            let deadline = Instant::now();
            self.memory
                .write_word_32(base_address + CS_ROM_DBGRSTRR, CS_ROM_DBGRST_REQ)?;
            // Wait for the request to clear, deasserting once acknowledged.
            while self.memory.read_word_32(base_address + CS_ROM_DBGRSTRR)? & CS_ROM_DBGRST_REQ != 0
            {
                if self.memory.read_word_32(base_address + CS_ROM_DBGRSTAR)? & CS_ROM_DBGRST_REQ
                    != 0
                {
                    self.memory.write_word_32(base_address + CS_ROM_DBGRSTRR, 0)?;
                }
                if deadline.elapsed() >= ADI_TIMEOUT {
                    tracing::warn!("Debug reset request timed out");
                    self.memory.write_word_32(base_address + CS_ROM_DBGRSTRR, 0)?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Request power-up of one debug power domain and poll its status.
    ///
    /// Returns `false` when the domain did not come up in time; the caller
    /// abandons the table since its components are unreachable unpowered.
    fn power_up_domain(
        &mut self,
        base_address: u64,
        domain_offset: u64,
    ) -> Result<bool, RomTableError> {
        let pcr_address = base_address + CS_ROM_DBGPCR_BASE + domain_offset;
        let psr_address = base_address + CS_ROM_DBGPSR_BASE + domain_offset;

        if self.memory.read_word_32(pcr_address)? & CS_ROM_DBGPCR_PRESENT == 0 {
            return Ok(true);
        }
        self.memory.write_word_32(pcr_address, CS_ROM_DBGPCR_PWRREQ)?;

        let deadline = Instant::now();
        while self.memory.read_word_32(psr_address)? & CS_ROM_DBGPSR_STATUS_ON == 0 {
            if deadline.elapsed() >= ADI_TIMEOUT {
                tracing::warn!("Power-up of debug power domain failed");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    /// A map backed fake AP memory.
    struct MockMemory {
        words: HashMap<u64, u32>,
    }

    impl MockMemory {
        fn new() -> Self {
            Self {
                words: HashMap::new(),
            }
        }

        fn set(&mut self, address: u64, value: u32) {
            self.words.insert(address, value);
        }

        /// Install CIDR registers for a component of the given class.
        fn add_cid(&mut self, base: u64, class: u8) {
            self.set(base + 0xFF0, 0x0D);
            self.set(base + 0xFF4, u32::from(class) << 4);
            self.set(base + 0xFF8, 0x05);
            self.set(base + 0xFFC, 0xB1);
        }

        /// Install PIDR registers for an ARM designed part.
        fn add_arm_pidr(&mut self, base: u64, part: u16, size: u8) {
            self.set(base + 0xFE0, u32::from(part) & 0xff);
            // Part high nibble plus the low nibble of the ARM identity.
            self.set(base + 0xFE4, u32::from(part >> 8) | 0xB0);
            // JEP106-used bit plus the rest of the ARM identity code.
            self.set(base + 0xFE8, 0x0B);
            self.set(base + 0xFEC, 0x00);
            // Continuation code 4, SIZE field.
            self.set(base + 0xFD0, 0x04 | (u32::from(size) << 4));
            self.set(base + 0xFD4, 0);
            self.set(base + 0xFD8, 0);
            self.set(base + 0xFDC, 0);
        }

        /// Install a legacy ROM table at `base` with the given entries.
        fn add_legacy_rom_table(&mut self, base: u64, entries: &[u32]) {
            self.add_cid(base, 0x1);
            self.add_arm_pidr(base, 0x4c4, 0);
            self.set(base + 0xFCC, 0x1);
            for (index, entry) in entries.iter().enumerate() {
                self.set(base + index as u64 * 4, *entry);
            }
        }

        /// Install a Cortex-M4 SCS at `base`.
        fn add_m4_scs(&mut self, base: u64) {
            self.add_cid(base, 0xE);
            self.add_arm_pidr(base, 0x00c, 0);
        }
    }

    impl ArmMemoryInterface for MockMemory {
        fn read_word_32(&mut self, address: u64) -> Result<u32, ArmError> {
            Ok(*self.words.get(&address).unwrap_or(&0))
        }

        fn read_word_16(&mut self, address: u64) -> Result<u16, ArmError> {
            Ok(self.read_word_32(address & !3)? as u16)
        }

        fn read_word_8(&mut self, address: u64) -> Result<u8, ArmError> {
            Ok(self.read_word_32(address & !3)? as u8)
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
            self.set(address, data);
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
    fn legacy_walk_finds_a_cortex_m_and_stops_at_the_zero_entry() {
        let mut memory = MockMemory::new();
        // Entry 0 -> SCS at +0x1000, entry 1 not present, entry 2 zero
        // terminates; nothing after it may be read.
        memory.add_legacy_rom_table(
            0xe00f_f000,
            &[0x0000_1003, 0x0000_2002, 0, 0x0000_3003],
        );
        memory.add_m4_scs(0xe010_0000);

        let result = ComponentWalker::new(&mut memory).walk(0xe00f_f000).unwrap();

        assert_eq!(result.components, vec![DiscoveredComponent::CortexM]);
        assert!(result.has_sysmem);
        assert_eq!(result.root_id, Some((designer::ARM, 0x4c4)));
    }

    #[test]
    fn garbage_preamble_rejects_the_component() {
        let mut memory = MockMemory::new();
        // Nothing installed: CIDR reads as zero.
        let result = ComponentWalker::new(&mut memory).walk(0xe00f_f000);
        assert!(matches!(result, Err(RomTableError::InvalidPreamble(_))));
    }

    #[test]
    fn garbage_entry_does_not_fail_the_walk() {
        let mut memory = MockMemory::new();
        // Entry 0 points at empty memory (bad preamble), entry 1 at a
        // valid SCS; the bad branch is abandoned, the good one probed.
        memory.add_legacy_rom_table(0xe00f_f000, &[0x0000_1003, 0x0000_2003, 0]);
        memory.add_m4_scs(0xe010_1000);

        let result = ComponentWalker::new(&mut memory).walk(0xe00f_f000).unwrap();
        assert_eq!(result.components, vec![DiscoveredComponent::CortexM]);
    }

    #[test]
    fn rom_table_with_size_field_set_is_a_fault() {
        let mut memory = MockMemory::new();
        memory.add_cid(0xe00f_f000, 0x1);
        // SIZE field of 1: the table must not be walked.
        memory.add_arm_pidr(0xe00f_f000, 0x4c4, 1);
        // An (unreachable) valid entry.
        memory.set(0xe00f_f000, 0x0000_1003);
        memory.add_m4_scs(0xe010_0000);

        let result = ComponentWalker::new(&mut memory).walk(0xe00f_f000);
        assert!(matches!(result, Err(RomTableError::SizeFieldSet(_))));
    }

    #[test]
    fn self_referential_tables_terminate() {
        let mut memory = MockMemory::new();
        // The table's first entry points back at the table itself.
        memory.add_legacy_rom_table(0xe00f_f000, &[0x0000_0003, 0]);

        let result = ComponentWalker::new(&mut memory).walk(0xe00f_f000).unwrap();
        assert!(result.components.is_empty());
    }

    #[test]
    fn coresight_v0_walk_honours_the_final_marker() {
        let mut memory = MockMemory::new();
        let base = 0x8000_0000u64;
        // A CoreSight class-0x9 ROM table (matched via DEVARCH).
        memory.add_cid(base, 0x9);
        memory.add_arm_pidr(base, 0x000, 0);
        memory.set(base + 0xFBC, DEVARCH_PRESENT | u32::from(super::super::component::ARCHID_ROMTABLE_V0));
        memory.set(base + 0xFCC, 0);
        // DEVID: 32-bit format, SYSMEM set, no power control.
        memory.set(base + 0xFC8, CS_ROM_DEVID_SYSMEM);
        // Entry 0: present, component at +0x1000; entry 1: final.
        memory.set(base, 0x0000_1003);
        memory.set(base + 4, 0);
        memory.add_m4_scs(base + 0x1000);

        let result = ComponentWalker::new(&mut memory).walk(base).unwrap();
        assert_eq!(result.components, vec![DiscoveredComponent::CortexM]);
        assert!(result.has_sysmem);
    }
}
