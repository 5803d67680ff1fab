//! CoreSight component classification.
//!
//! Components are identified by the triple (part number, DEVTYPE, DEVARCH
//! architecture ID) read during the ROM table walk, and looked up in a
//! static table to decide which probe routine gets the component.

/// Component ID classes, from the CIDR1 class nibble.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CidClass {
    /// Generic verification component.
    GenericVerification,
    /// ROM table, standard ADIv5 layout.
    RomTable,
    /// Debug component, CoreSight layout.
    DebugComponent,
    /// Peripheral test block.
    PeripheralTestBlock,
    /// OptimoDE Data Engine SubSystem component.
    DataEngine,
    /// Generic IP component.
    GenericIp,
    /// CoreLink / PrimeCell / non-standard system component.
    SystemComponent,
    /// A reserved class value.
    Reserved(u8),
}

impl From<u8> for CidClass {
    fn from(value: u8) -> Self {
        match value {
            0x0 => CidClass::GenericVerification,
            0x1 => CidClass::RomTable,
            0x9 => CidClass::DebugComponent,
            0xB => CidClass::PeripheralTestBlock,
            0xD => CidClass::DataEngine,
            0xE => CidClass::GenericIp,
            0xF => CidClass::SystemComponent,
            other => CidClass::Reserved(other),
        }
    }
}

impl CidClass {
    /// A human readable name for diagnostics.
    pub fn description(&self) -> &'static str {
        match self {
            CidClass::GenericVerification => "Generic verification component",
            CidClass::RomTable => "ROM Table",
            CidClass::DebugComponent => "Debug component",
            CidClass::PeripheralTestBlock => "Peripheral Test Block",
            CidClass::DataEngine => "OptimoDE Data Engine SubSystem component",
            CidClass::GenericIp => "Generic IP component",
            CidClass::SystemComponent => "System component",
            CidClass::Reserved(_) => "Reserved component class",
        }
    }
}

/// The architecture family a component belongs to, deciding which probe
/// routine it is dispatched to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArmArchitecture {
    /// Identified but not debuggable through this crate (trace macrocells,
    /// cross triggers, ...).
    NoSupport,
    /// A Cortex-M system control space.
    CortexM,
    /// A Cortex-A debug unit.
    CortexA,
    /// A Cortex-R debug unit.
    CortexR,
    /// A CoreSight class-0x9 ROM table.
    RomTable,
    /// An ADIv6 MEM-APv2.
    AccessPort,
}

/// One entry of the static component table.
#[derive(Debug)]
pub struct ComponentEntry {
    /// PIDR part number (zeroed for CoreSight ROM tables, which are matched
    /// by architecture ID alone).
    pub part_number: u16,
    /// DEVTYPE major/sub nibbles.
    pub dev_type: u8,
    /// DEVARCH architecture ID, zero when not present.
    pub arch_id: u16,
    /// Dispatch target.
    pub arch: ArmArchitecture,
    /// The CID class this component is expected to advertise, if known.
    pub expected_class: Option<CidClass>,
    /// Component name for diagnostics.
    pub name: &'static str,
    /// Longer description for diagnostics.
    pub description: &'static str,
}

const fn entry(
    part_number: u16,
    dev_type: u8,
    arch_id: u16,
    arch: ArmArchitecture,
    expected_class: Option<CidClass>,
    name: &'static str,
    description: &'static str,
) -> ComponentEntry {
    ComponentEntry {
        part_number,
        dev_type,
        arch_id,
        arch,
        expected_class,
        name,
        description,
    }
}

/// DEVARCH architecture ID of CoreSight class-0x9 ROM tables.
pub(crate) const ARCHID_ROMTABLE_V0: u16 = 0x0af7;

use ArmArchitecture::{AccessPort, CortexA, CortexM, CortexR, NoSupport, RomTable};
use CidClass::{DebugComponent as Dc, GenericIp as Gipc, SystemComponent as Sys};

/// The static component lookup table, keyed on (part number, DEVTYPE,
/// architecture ID). Immutable: every lookup of the same key returns the
/// same entry.
static COMPONENT_TABLE: &[ComponentEntry] = &[
    entry(0x000, 0x00, 0, CortexM, Some(Gipc), "Cortex-M3 SCS", "(System Control Space)"),
    entry(0x001, 0x00, 0, NoSupport, None, "Cortex-M3 ITM", "(Instrumentation Trace Module)"),
    entry(0x002, 0x00, 0, NoSupport, None, "Cortex-M3 DWT", "(Data Watchpoint and Trace)"),
    entry(0x003, 0x00, 0, NoSupport, None, "Cortex-M3 FBP", "(Flash Patch and Breakpoint)"),
    entry(0x008, 0x00, 0, CortexM, Some(Gipc), "Cortex-M0 SCS", "(System Control Space)"),
    entry(0x00a, 0x00, 0, NoSupport, None, "Cortex-M0 DWT", "(Data Watchpoint and Trace)"),
    entry(0x00b, 0x00, 0, NoSupport, None, "Cortex-M0 BPU", "(Breakpoint Unit)"),
    entry(0x00c, 0x00, 0, CortexM, Some(Gipc), "Cortex-M4 SCS", "(System Control Space)"),
    entry(0x00d, 0x00, 0, NoSupport, None, "CoreSight ETM11", "(Embedded Trace)"),
    entry(0x00e, 0x00, 0, NoSupport, None, "Cortex-M7 FBP", "(Flash Patch and Breakpoint)"),
    entry(0x101, 0x00, 0, NoSupport, None, "System TSGEN", "(Time Stamp Generator)"),
    entry(0x471, 0x00, 0, NoSupport, None, "Cortex-M0 ROM", "(Cortex-M0 ROM)"),
    entry(0x490, 0x00, 0, NoSupport, None, "Cortex-A15 GIC", "(Generic Interrupt Controller)"),
    entry(0x4c0, 0x00, 0, NoSupport, None, "Cortex-M0+ ROM", "(Cortex-M0+ ROM)"),
    entry(0x4c3, 0x00, 0, NoSupport, None, "Cortex-M3 ROM", "(Cortex-M3 ROM)"),
    entry(0x4c4, 0x00, 0, NoSupport, None, "Cortex-M4 ROM", "(Cortex-M4 ROM)"),
    entry(0x4c7, 0x00, 0, NoSupport, None, "Cortex-M7 PPB", "(Cortex-M7 PPB ROM Table)"),
    entry(0x4c8, 0x00, 0, NoSupport, None, "Cortex-M7 ROM", "(Cortex-M7 ROM)"),
    entry(0x000, 0x00, ARCHID_ROMTABLE_V0, RomTable, Some(Dc), "CoreSight ROM", "(ROM Table)"),
    entry(0x906, 0x14, 0, NoSupport, None, "CoreSight CTI", "(Cross Trigger)"),
    entry(0x907, 0x21, 0, NoSupport, None, "CoreSight ETB", "(Trace Buffer)"),
    entry(0x908, 0x12, 0, NoSupport, None, "CoreSight CSTF", "(Trace Funnel)"),
    entry(0x910, 0x00, 0, NoSupport, None, "CoreSight ETM9", "(Embedded Trace)"),
    entry(0x912, 0x11, 0, NoSupport, None, "CoreSight TPIU", "(Trace Port Interface Unit)"),
    entry(0x913, 0x43, 0, NoSupport, None, "CoreSight ITM", "(Instrumentation Trace Macrocell)"),
    entry(0x914, 0x11, 0, NoSupport, None, "CoreSight SWO", "(Single Wire Output)"),
    entry(0x917, 0x00, 0, NoSupport, None, "CoreSight HTM", "(AHB Trace Macrocell)"),
    entry(0x920, 0x00, 0, NoSupport, None, "CoreSight ETM11", "(Embedded Trace)"),
    entry(0x921, 0x13, 0, NoSupport, None, "Cortex-A8 ETM", "(Embedded Trace)"),
    entry(0x922, 0x14, 0, NoSupport, None, "Cortex-A8 CTI", "(Cross Trigger)"),
    entry(0x923, 0x11, 0, NoSupport, None, "Cortex-M3 TPIU", "(Trace Port Interface Unit)"),
    entry(0x924, 0x13, 0, NoSupport, None, "Cortex-M3 ETM", "(Embedded Trace)"),
    entry(0x925, 0x13, 0, NoSupport, None, "Cortex-M4 ETM", "(Embedded Trace)"),
    entry(0x930, 0x13, 0, NoSupport, None, "Cortex-R4 ETM", "(Embedded Trace)"),
    entry(0x932, 0x31, 0x0a31, NoSupport, None, "CoreSight MTB-M0+", "(Simple Execution Trace)"),
    entry(0x941, 0x00, 0, NoSupport, None, "CoreSight TPIU-Lite", "(Trace Port Interface Unit)"),
    entry(0x950, 0x13, 0, NoSupport, None, "Cortex-A9 PTM", "(Program Trace Macrocell)"),
    entry(0x955, 0x00, 0, NoSupport, None, "CoreSight Component", "(unidentified Cortex-A5 component)"),
    entry(0x956, 0x13, 0, NoSupport, None, "Cortex-A7 ETM", "(Embedded Trace)"),
    entry(0x95d, 0x13, 0, NoSupport, None, "Cortex-A53 ETM", "(Embedded Trace)"),
    entry(0x95f, 0x00, 0, NoSupport, None, "Cortex-A15 PTM", "(Program Trace Macrocell)"),
    entry(0x961, 0x32, 0, NoSupport, None, "CoreSight TMC", "(Trace Memory Controller)"),
    entry(0x961, 0x21, 0, NoSupport, None, "CoreSight TMC", "(Trace Buffer)"),
    entry(0x962, 0x00, 0, NoSupport, None, "CoreSight STM", "(System Trace Macrocell)"),
    entry(0x963, 0x63, 0x0a63, NoSupport, None, "CoreSight STM", "(System Trace Macrocell)"),
    entry(0x975, 0x13, 0x4a13, NoSupport, None, "Cortex-M7 ETM", "(Embedded Trace)"),
    entry(0x9a0, 0x16, 0, NoSupport, None, "CoreSight PMU", "(Performance Monitoring Unit)"),
    entry(0x9a1, 0x11, 0, NoSupport, None, "Cortex-M4 TPIU", "(Trace Port Interface Unit)"),
    entry(0x9a6, 0x14, 0x1a14, NoSupport, Some(Dc), "Cortex-M0+ CTI", "(Cross Trigger Interface)"),
    entry(0x9a9, 0x11, 0, NoSupport, None, "Cortex-M7 TPIU", "(Trace Port Interface Unit)"),
    entry(0x9a5, 0x13, 0, NoSupport, None, "Cortex-A5 ETM", "(Embedded Trace)"),
    entry(0x9a7, 0x16, 0, NoSupport, None, "Cortex-A7 PMU", "(Performance Monitor Unit)"),
    entry(0x9a8, 0x14, 0x1a14, NoSupport, None, "Cortex-A53 CTI", "(Cross Trigger)"),
    entry(0x9af, 0x16, 0, NoSupport, None, "Cortex-A15 PMU", "(Performance Monitor Unit)"),
    entry(0x9d3, 0x16, 0x2a16, NoSupport, None, "Cortex-A53 PMU", "(Performance Monitor Unit)"),
    entry(0xc05, 0x15, 0, CortexA, Some(Dc), "Cortex-A5", "(Debug Unit)"),
    entry(0xc07, 0x15, 0, CortexA, Some(Dc), "Cortex-A7", "(Debug Unit)"),
    entry(0xc08, 0x15, 0, CortexA, Some(Dc), "Cortex-A8", "(Debug Unit)"),
    entry(0xc09, 0x15, 0, CortexA, Some(Dc), "Cortex-A9", "(Debug Unit)"),
    entry(0xc0f, 0x15, 0, CortexA, None, "Cortex-A15", "(Debug Unit)"),
    entry(0xc14, 0x15, 0, CortexR, None, "Cortex-R4", "(Debug Unit)"),
    entry(0xcd0, 0x00, 0, NoSupport, None, "Atmel DSU", "(Device Service Unit)"),
    entry(0xd03, 0x15, 0x6a15, CortexA, Some(Dc), "Cortex-A53", "(Debug Unit)"),
    entry(0xd05, 0x13, 0x4a13, NoSupport, Some(Dc), "Cortex-A55 ETM", "(Embedded Trace)"),
    entry(0xd05, 0x14, 0x1a14, NoSupport, Some(Dc), "Cortex-A55 CTI", "(Cross Trigger)"),
    entry(0xd05, 0x15, 0x8a15, CortexA, Some(Dc), "Cortex-A55", "(Debug Unit)"),
    entry(0xd05, 0x16, 0x2a16, NoSupport, Some(Dc), "Cortex-A55 PMU", "(Performance Monitor Unit)"),
    entry(0xd20, 0x00, 0x2a04, CortexM, Some(Gipc), "Cortex-M23", "(System Control Space)"),
    entry(0xd20, 0x11, 0, NoSupport, Some(Dc), "Cortex-M23", "(Trace Port Interface Unit)"),
    entry(0xd20, 0x13, 0, NoSupport, Some(Dc), "Cortex-M23", "(Embedded Trace)"),
    entry(0xd20, 0x31, 0x0a31, NoSupport, Some(Dc), "Cortex-M23", "(Micro Trace Buffer)"),
    entry(0xd20, 0x00, 0x1a02, NoSupport, Some(Dc), "Cortex-M23", "(Data Watchpoint and Trace)"),
    entry(0xd20, 0x00, 0x1a03, NoSupport, Some(Dc), "Cortex-M23", "(Breakpoint Unit)"),
    entry(0xd20, 0x14, 0x1a14, NoSupport, Some(Dc), "Cortex-M23", "(Cross Trigger)"),
    entry(0xd21, 0x00, 0x2a04, CortexM, Some(Gipc), "Cortex-M33", "(System Control Space)"),
    entry(0xd21, 0x31, 0x0a31, NoSupport, Some(Dc), "Cortex-M33", "(Micro Trace Buffer)"),
    entry(0xd21, 0x43, 0x1a01, NoSupport, Some(Dc), "Cortex-M33", "(Instrumentation Trace Macrocell)"),
    entry(0xd21, 0x00, 0x1a02, NoSupport, Some(Dc), "Cortex-M33", "(Data Watchpoint and Trace)"),
    entry(0xd21, 0x00, 0x1a03, NoSupport, Some(Dc), "Cortex-M33", "(Breakpoint Unit)"),
    entry(0xd21, 0x14, 0x1a14, NoSupport, Some(Dc), "Cortex-M33", "(Cross Trigger)"),
    entry(0xd21, 0x13, 0x4a13, NoSupport, Some(Dc), "Cortex-M33", "(Embedded Trace)"),
    entry(0xd21, 0x11, 0, NoSupport, Some(Dc), "Cortex-M33", "(Trace Port Interface Unit)"),
    entry(0xd22, 0x00, 0x2a04, CortexM, Some(Dc), "Cortex-M55", "(System Control Space)"),
    entry(0xd22, 0x00, 0x1a02, NoSupport, Some(Dc), "Cortex-M55", "(Data Watchpoint and Trace)"),
    entry(0xd22, 0x00, 0x1a03, NoSupport, Some(Dc), "Cortex-M55", "(Breakpoint Unit)"),
    entry(0xd22, 0x43, 0x1a01, NoSupport, Some(Dc), "Cortex-M55", "(Instrumentation Trace Macrocell)"),
    entry(0xd22, 0x13, 0x4a13, NoSupport, Some(Dc), "Cortex-M55", "(Embedded Trace)"),
    entry(0xd22, 0x16, 0x0a06, NoSupport, Some(Dc), "Cortex-M55", "(Performance Monitoring Unit)"),
    entry(0xd22, 0x14, 0x1a14, NoSupport, Some(Dc), "Cortex-M55", "(Cross Trigger)"),
    entry(0x132, 0x31, 0x0a31, NoSupport, Some(Dc), "STAR-MC1 MTB", "(Execution Trace)"),
    entry(0x132, 0x43, 0x1a01, NoSupport, Some(Dc), "STAR-MC1 ITM", "(Instrumentation Trace Module)"),
    entry(0x132, 0x00, 0x1a02, NoSupport, Some(Dc), "STAR-MC1 DWT", "(Data Watchpoint and Trace)"),
    entry(0x132, 0x00, 0x1a03, NoSupport, Some(Dc), "STAR-MC1 BPU", "(Breakpoint Unit)"),
    entry(0x132, 0x14, 0x1a14, NoSupport, Some(Dc), "STAR-MC1 CTI", "(Cross Trigger)"),
    entry(0x132, 0x00, 0x2a04, CortexM, Some(Dc), "STAR-MC1 SCS", "(System Control Space)"),
    entry(0x132, 0x13, 0x4a13, NoSupport, Some(Dc), "STAR-MC1 ETM", "(Embedded Trace)"),
    entry(0x132, 0x11, 0, NoSupport, Some(Dc), "STAR-MC1 TPIU", "(Trace Port Interface Unit)"),
    entry(0x9a3, 0x13, 0, NoSupport, Some(Dc), "nRF NTB", "(Nordic Trace Buffer)"),
    entry(0x9e2, 0x00, 0x0a17, AccessPort, Some(Dc), "ADIv6 MEM-APv2", "(Memory Access Port)"),
    entry(0x9e3, 0x00, 0x0a17, AccessPort, Some(Dc), "ADIv6 MEM-APv2", "(Memory Access Port)"),
    entry(0x193, 0x00, 0x0000, NoSupport, Some(Sys), "CoreSight TSG", "(Timestamp Generator)"),
    entry(0x9e4, 0x00, 0x0a17, NoSupport, Some(Dc), "CoreSight MTE", "(Memory Tagging Extension)"),
    entry(0x9e7, 0x11, 0x0000, NoSupport, Some(Dc), "CoreSight TPIU", "(Trace Port Interface Unit)"),
    entry(0x9e8, 0x21, 0x0000, NoSupport, Some(Dc), "CoreSight TCM", "(Trace Memory Controller)"),
    entry(0x9eb, 0x12, 0x0000, NoSupport, Some(Dc), "CoreSight ATBF", "(ATB Funnel)"),
    entry(0x9ec, 0x22, 0x0000, NoSupport, Some(Dc), "CoreSight ATBR", "(ATB Replicator)"),
    entry(0x9ed, 0x14, 0x1a14, NoSupport, Some(Dc), "CoreSight CTI", "(Cross Trigger Interface)"),
    entry(0x9ee, 0x00, 0x0000, NoSupport, Some(Dc), "CoreSight CATU", "(Address Translation Unit)"),
];

/// Look a component up by its identification triple.
///
/// CoreSight class-0x9 ROM tables are matched by architecture ID alone, so
/// the part number is zeroed for them before matching.
pub fn lookup_component(
    part_number: u16,
    dev_type: u8,
    arch_id: u16,
) -> Option<&'static ComponentEntry> {
    let part_number = if arch_id == ARCHID_ROMTABLE_V0 {
        0
    } else {
        part_number
    };
    COMPONENT_TABLE.iter().find(|entry| {
        entry.part_number == part_number && entry.dev_type == dev_type && entry.arch_id == arch_id
    })
}

/// Adjust the advertised CID class for known silicon mistakes.
///
/// Cortex-M23 and -M33 SCSs advertise themselves as debug components but
/// are laid out as generic IP components; without the correction the sanity
/// check against the table would warn on every M23/M33.
pub(crate) fn adjust_cid_class(part_number: u16, arch_id: u16, cid_class: CidClass) -> CidClass {
    if (part_number == 0xd20 || part_number == 0xd21)
        && arch_id == 0x2a04
        && cid_class == CidClass::DebugComponent
    {
        return CidClass::GenericIp;
    }
    cid_class
}

// PIDR field layout (see the ADIv5/ADIv6 specifications, "Peripheral
// Identification Registers").
const PIDR_JEP106_USED: u64 = 1 << 19;
const PIDR_JEP106_CONT_MASK: u64 = 0xf_0000_0000;
const PIDR_JEP106_CONT_OFFSET: u32 = 32;
const PIDR_JEP106_CODE_MASK: u64 = 0x7_f000;
const PIDR_JEP106_CODE_OFFSET: u32 = 12;
pub(crate) const PIDR_PART_MASK: u64 = 0xfff;
/// The PIDR 4KB-count field; must be zero on ROM tables.
pub(crate) const PIDR_SIZE_MASK: u64 = 0xf0_0000_0000;

/// Flag marking a legacy ASCII identity code rather than a JEP106 one.
pub(crate) const ASCII_CODE_FLAG: u16 = 1 << 15;

/// JEP106 designer codes, packed as continuation count in bits 11:8 and
/// identity (without parity) in bits 6:0.
pub(crate) mod designer {
    /// ARM Ltd.
    pub const ARM: u16 = 0x43b;
    /// Arm China.
    pub const ARM_CHINA: u16 = 0xa75;
    /// STMicroelectronics.
    pub const STM: u16 = 0x020;
    /// Non-compliant code found on STM32WB/WL parts.
    pub const ERRATA_STM32WX: u16 = 0x420;
    /// Non-compliant code found on some CS parts.
    pub const ERRATA_CS: u16 = 0x555;
    /// The same CS code with the legacy ASCII flag.
    pub const ERRATA_CS_ASCII: u16 = super::ASCII_CODE_FLAG | 0x055;
}

/// Extract the designer code from a PIDR value.
///
/// Returns the packed JEP106 code (continuation in bits 11:8, identity in
/// bits 6:0), or the legacy ASCII identity with [`ASCII_CODE_FLAG`] set
/// when the component predates JEP106 numbering. Known non-compliant codes
/// are remapped to their canonical values.
pub fn designer_from_pidr(pidr: u64) -> u16 {
    let designer_code = if pidr & PIDR_JEP106_USED != 0 {
        // The continuation code wants to land on bits 11:8 of the result.
        (((pidr & PIDR_JEP106_CONT_MASK) >> (PIDR_JEP106_CONT_OFFSET - 8)) as u16)
            | (((pidr & PIDR_JEP106_CODE_MASK) >> PIDR_JEP106_CODE_OFFSET) as u16)
    } else {
        (((pidr & PIDR_JEP106_CODE_MASK) >> PIDR_JEP106_CODE_OFFSET) as u16) | ASCII_CODE_FLAG
    };

    match designer_code {
        designer::ERRATA_STM32WX | designer::ERRATA_CS | designer::ERRATA_CS_ASCII => {
            tracing::warn!(
                "Patching designer code {designer_code:#05x} -> {:#05x}",
                designer::STM
            );
            designer::STM
        }
        code => code,
    }
}

/// Render a packed designer code through the JEP106 tables for diagnostics.
pub fn designer_name(code: u16) -> Option<&'static str> {
    if code & ASCII_CODE_FLAG != 0 {
        return None;
    }
    jep106::JEP106Code::new((code >> 8) as u8, (code & 0x7f) as u8).get()
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    /// Build a PIDR with the JEP106-used bit and the given packed designer
    /// code and part number.
    fn pidr_with_designer(code: u16, part: u16) -> u64 {
        let cont = u64::from(code >> 8);
        let identity = u64::from(code & 0x7f);
        PIDR_JEP106_USED
            | (cont << PIDR_JEP106_CONT_OFFSET)
            | (identity << PIDR_JEP106_CODE_OFFSET)
            | u64::from(part)
    }

    #[test_case(designer::ARM, designer::ARM ; "arm round trips")]
    #[test_case(designer::STM, designer::STM ; "st round trips")]
    #[test_case(designer::ARM_CHINA, designer::ARM_CHINA ; "arm china round trips")]
    #[test_case(designer::ERRATA_STM32WX, designer::STM ; "stm32wx erratum is remapped")]
    #[test_case(designer::ERRATA_CS, designer::STM ; "cs erratum is remapped")]
    fn designer_codes(input: u16, expected: u16) {
        let pidr = pidr_with_designer(input, 0x123);
        assert_eq!(designer_from_pidr(pidr), expected);
    }

    #[test]
    fn legacy_pidr_yields_ascii_code() {
        // JEP106-used bit clear: the identity field is a legacy ASCII code.
        let pidr = 0x41u64 << PIDR_JEP106_CODE_OFFSET;
        assert_eq!(designer_from_pidr(pidr), ASCII_CODE_FLAG | 0x41);
    }

    #[test]
    fn ascii_cs_erratum_is_remapped() {
        // A legacy ASCII 0x55 is the known non-compliant CS code and maps
        // to the canonical ST designer.
        let pidr = 0x55u64 << PIDR_JEP106_CODE_OFFSET;
        assert_eq!(designer_from_pidr(pidr), designer::STM);
    }

    #[test]
    fn lookup_is_pure_over_the_whole_table() {
        // Looking every entry up by its own key must return an entry with
        // the same classification, on every call.
        for entry in COMPONENT_TABLE {
            let key_part = entry.part_number;
            let first = lookup_component(key_part, entry.dev_type, entry.arch_id)
                .expect("every table entry must be reachable by its own key");
            let second = lookup_component(key_part, entry.dev_type, entry.arch_id).unwrap();
            assert_eq!(first.arch, second.arch);
            assert_eq!(first.name, second.name);
            // Duplicated keys may shadow later entries, but the dispatch
            // class of the winning entry is stable.
            assert_eq!(first.arch, lookup_component(key_part, entry.dev_type, entry.arch_id).unwrap().arch);
        }
    }

    #[test]
    fn romtable_lookup_ignores_part_number() {
        let entry = lookup_component(0xabc, 0x00, ARCHID_ROMTABLE_V0).unwrap();
        assert_eq!(entry.arch, ArmArchitecture::RomTable);
    }

    #[test]
    fn m23_and_m33_scs_class_is_corrected() {
        assert_eq!(
            adjust_cid_class(0xd20, 0x2a04, CidClass::DebugComponent),
            CidClass::GenericIp
        );
        assert_eq!(
            adjust_cid_class(0xd21, 0x2a04, CidClass::DebugComponent),
            CidClass::GenericIp
        );
        // Other parts keep their advertised class.
        assert_eq!(
            adjust_cid_class(0xc09, 0, CidClass::DebugComponent),
            CidClass::DebugComponent
        );
    }

    #[test]
    fn cortex_families_dispatch_to_their_engines() {
        assert_eq!(
            lookup_component(0x00c, 0x00, 0).unwrap().arch,
            ArmArchitecture::CortexM
        );
        assert_eq!(
            lookup_component(0xc09, 0x15, 0).unwrap().arch,
            ArmArchitecture::CortexA
        );
        assert_eq!(
            lookup_component(0xc14, 0x15, 0).unwrap().arch,
            ArmArchitecture::CortexR
        );
        assert_eq!(
            lookup_component(0x9e2, 0x00, 0x0a17).unwrap().arch,
            ArmArchitecture::AccessPort
        );
    }
}
