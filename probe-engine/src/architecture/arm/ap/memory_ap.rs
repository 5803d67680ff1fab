//! The MEM-AP register file and memory access through it.

use super::super::communication_interface::DapAccess;
use super::super::{ArmCommunicationInterface, ArmError, ArmMemoryInterface, Register};
use super::AccessPort;
use bitfield::bitfield;

/// Register byte offsets shared by ADIv5 MEM-APs and (shifted onto the
/// 0xD00 register file by the DP engine) ADIv6 MEM-APv2s.
pub(crate) const CFG_ADDRESS: u8 = 0xF4;
pub(crate) const BASE_ADDRESS: u8 = 0xF8;
pub(crate) const BASE2_ADDRESS: u8 = 0xF0;

/// CFG.LA: the AP supports 64-bit addresses.
pub(crate) const CFG_LARGE_ADDRESS: u32 = 1 << 1;

bitfield! {
    /// The MEM-AP Control and Status Word.
    #[derive(Copy, Clone)]
    pub struct CSW(u32);
    impl Debug;
    /// Debug software access enable.
    pub dbg_sw_enable, set_dbg_sw_enable: 31;
    /// Bus specific protection control.
    pub u8, prot, set_prot: 30, 24;
    /// Secure privileged debug enabled.
    pub spiden, _: 23;
    /// A transfer is in progress on the memory bus.
    pub tr_in_prog, _: 7;
    /// The AP is enabled.
    pub device_en, _: 6;
    /// Address auto-increment mode.
    pub u8, addr_inc, set_addr_inc: 5, 4;
    /// Transfer size.
    pub u8, size, set_size: 2, 0;
}

impl From<u32> for CSW {
    fn from(raw: u32) -> Self {
        CSW(raw)
    }
}

impl From<CSW> for u32 {
    fn from(raw: CSW) -> Self {
        raw.0
    }
}

impl Register for CSW {
    const ADDRESS: u8 = 0x00;
    const NAME: &'static str = "CSW";
}

/// The Transfer Address Register (low half).
#[derive(Debug, Copy, Clone)]
pub struct TAR(pub u32);

impl From<u32> for TAR {
    fn from(raw: u32) -> Self {
        TAR(raw)
    }
}

impl From<TAR> for u32 {
    fn from(raw: TAR) -> Self {
        raw.0
    }
}

impl Register for TAR {
    const ADDRESS: u8 = 0x04;
    const NAME: &'static str = "TAR";
}

/// The Transfer Address Register (high half, large-address APs only).
#[derive(Debug, Copy, Clone)]
pub struct TAR2(pub u32);

impl From<u32> for TAR2 {
    fn from(raw: u32) -> Self {
        TAR2(raw)
    }
}

impl From<TAR2> for u32 {
    fn from(raw: TAR2) -> Self {
        raw.0
    }
}

impl Register for TAR2 {
    const ADDRESS: u8 = 0x08;
    const NAME: &'static str = "TAR2";
}

/// The Data Read/Write register.
#[derive(Debug, Copy, Clone)]
pub struct DRW(pub u32);

impl From<u32> for DRW {
    fn from(raw: u32) -> Self {
        DRW(raw)
    }
}

impl From<DRW> for u32 {
    fn from(raw: DRW) -> Self {
        raw.0
    }
}

impl Register for DRW {
    const ADDRESS: u8 = 0x0C;
    const NAME: &'static str = "DRW";
}

/// Transfer sizes of a MEM-AP access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DataSize {
    U8 = 0b000,
    U16 = 0b001,
    U32 = 0b010,
}

impl DataSize {
    fn bytes(self) -> u64 {
        match self {
            DataSize::U8 => 1,
            DataSize::U16 => 2,
            DataSize::U32 => 4,
        }
    }
}

/// TAR auto-increment is only guaranteed across the low 10 address bits;
/// crossing this boundary requires re-seeding TAR.
const TAR_WRAP: u64 = 0x400;

/// A memory access port: the window through which CoreSight components and
/// core memory are reached.
///
/// Holds a clone of the DP handle, so the DP outlives every `MemoryAp`
/// created on it.
#[derive(Debug, Clone)]
pub struct MemoryAp {
    interface: ArmCommunicationInterface,
    ap: AccessPort,
    /// The TAR value the hardware is currently incrementing from, if known.
    cached_tar: Option<u64>,
    /// The CSW value last programmed, if known.
    cached_csw: Option<u32>,
}

impl MemoryAp {
    /// Wrap a configured access port for memory access.
    pub fn new(interface: ArmCommunicationInterface, ap: AccessPort) -> Self {
        Self {
            interface,
            ap,
            cached_tar: None,
            cached_csw: None,
        }
    }

    /// The configured AP record.
    pub fn access_port(&self) -> &AccessPort {
        &self.ap
    }

    /// The validated debug base address of this AP.
    pub fn base_address(&self) -> u64 {
        self.ap.base_address
    }

    /// Mark that the walker found system memory behind this AP.
    pub(crate) fn set_has_mem(&mut self) {
        self.ap.has_mem = true;
    }

    /// The DP handle this AP lives on.
    pub fn interface(&mut self) -> &mut ArmCommunicationInterface {
        &mut self.interface
    }

    fn check_address(&self, address: u64) -> Result<(), ArmError> {
        if !self.ap.large_address && address > u64::from(u32::MAX) {
            return Err(ArmError::OutOfBounds(address));
        }
        Ok(())
    }

    /// Program CSW and TAR for a transfer run at the given width.
    fn setup_access(&mut self, address: u64, size: DataSize) -> Result<(), ArmError> {
        let csw = self.ap.csw | (1 << 4) /* increment single */ | size as u32;
        if self.cached_csw != Some(csw) {
            self.interface
                .write_raw_ap_register(&self.ap.address, CSW::ADDRESS, csw)?;
            self.cached_csw = Some(csw);
        }
        self.write_tar(address)
    }

    fn write_tar(&mut self, address: u64) -> Result<(), ArmError> {
        if self.ap.large_address {
            self.interface.write_raw_ap_register(
                &self.ap.address,
                TAR2::ADDRESS,
                (address >> 32) as u32,
            )?;
        }
        self.interface
            .write_raw_ap_register(&self.ap.address, TAR::ADDRESS, address as u32)?;
        self.cached_tar = Some(address);
        Ok(())
    }

    /// Re-seed TAR if the auto-increment wrapped out of its 10-bit window.
    fn reseed_tar(&mut self, address: u64) -> Result<(), ArmError> {
        match self.cached_tar {
            Some(tar) if (tar ^ address) & !(TAR_WRAP - 1) == 0 => Ok(()),
            _ => self.write_tar(address),
        }
    }

    /// One DRW transfer at the given width, with lane placement for narrow
    /// accesses.
    fn transfer_word(
        &mut self,
        address: u64,
        size: DataSize,
        value: Option<u32>,
    ) -> Result<u32, ArmError> {
        self.reseed_tar(address)?;
        let result = match value {
            Some(value) => {
                let lane_shift = (address as u32 & 0x3) * 8;
                self.interface.write_raw_ap_register(
                    &self.ap.address,
                    DRW::ADDRESS,
                    value << lane_shift,
                )?;
                0
            }
            None => {
                let raw = self
                    .interface
                    .read_raw_ap_register(&self.ap.address, DRW::ADDRESS)?;
                let lane_shift = (address as u32 & 0x3) * 8;
                match size {
                    DataSize::U8 => (raw >> lane_shift) & 0xff,
                    DataSize::U16 => (raw >> ((address as u32 & 0x2) * 8)) & 0xffff,
                    DataSize::U32 => raw,
                }
            }
        };
        self.cached_tar = Some(address + size.bytes());
        Ok(result)
    }

    /// Stream 32-bit words through DRW, chunked at the TAR wrap boundary.
    fn stream_words(
        &mut self,
        mut address: u64,
        mut data: StreamDir<'_>,
    ) -> Result<(), ArmError> {
        while !data.is_empty() {
            self.reseed_tar(address)?;
            let until_wrap = ((TAR_WRAP - (address & (TAR_WRAP - 1))) / 4) as usize;
            let chunk = data.len().min(until_wrap);
            match &mut data {
                StreamDir::Read(values) => {
                    let (head, rest) = std::mem::take(values).split_at_mut(chunk);
                    self.interface.read_raw_ap_register_repeated(
                        &self.ap.address,
                        DRW::ADDRESS,
                        head,
                    )?;
                    *values = rest;
                }
                StreamDir::Write(values) => {
                    let (head, rest) = values.split_at(chunk);
                    self.interface.write_raw_ap_register_repeated(
                        &self.ap.address,
                        DRW::ADDRESS,
                        head,
                    )?;
                    *values = rest;
                }
            }
            address += chunk as u64 * 4;
            self.cached_tar = Some(address);
        }
        Ok(())
    }
}

enum StreamDir<'a> {
    Read(&'a mut [u32]),
    Write(&'a [u32]),
}

impl StreamDir<'_> {
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn len(&self) -> usize {
        match self {
            StreamDir::Read(values) => values.len(),
            StreamDir::Write(values) => values.len(),
        }
    }
}

impl ArmMemoryInterface for MemoryAp {
    fn read_word_32(&mut self, address: u64) -> Result<u32, ArmError> {
        self.check_address(address)?;
        self.setup_access(address, DataSize::U32)?;
        self.transfer_word(address, DataSize::U32, None)
    }

    fn read_word_16(&mut self, address: u64) -> Result<u16, ArmError> {
        self.check_address(address)?;
        self.setup_access(address, DataSize::U16)?;
        Ok(self.transfer_word(address, DataSize::U16, None)? as u16)
    }

    fn read_word_8(&mut self, address: u64) -> Result<u8, ArmError> {
        self.check_address(address)?;
        self.setup_access(address, DataSize::U8)?;
        Ok(self.transfer_word(address, DataSize::U8, None)? as u8)
    }

    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError> {
        self.check_address(address)?;
        self.setup_access(address, DataSize::U32)?;
        self.stream_words(address, StreamDir::Read(data))
    }

    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ArmError> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_address(address)?;
        // Narrow head until word aligned, then words, then a narrow tail.
        let mut offset = 0usize;
        let mut current = address;
        while current & 0x3 != 0 && offset < data.len() {
            data[offset] = self.read_word_8(current)?;
            offset += 1;
            current += 1;
        }
        let words = (data.len() - offset) / 4;
        if words > 0 {
            let mut buffer = vec![0u32; words];
            self.read_32(current, &mut buffer)?;
            for word in buffer {
                data[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
                offset += 4;
                current += 4;
            }
        }
        while offset < data.len() {
            data[offset] = self.read_word_8(current)?;
            offset += 1;
            current += 1;
        }
        Ok(())
    }

    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), ArmError> {
        self.check_address(address)?;
        self.setup_access(address, DataSize::U32)?;
        self.transfer_word(address, DataSize::U32, Some(data))?;
        Ok(())
    }

    fn write_word_16(&mut self, address: u64, data: u16) -> Result<(), ArmError> {
        self.check_address(address)?;
        self.setup_access(address, DataSize::U16)?;
        self.transfer_word(address, DataSize::U16, Some(u32::from(data)))?;
        Ok(())
    }

    fn write_word_8(&mut self, address: u64, data: u8) -> Result<(), ArmError> {
        self.check_address(address)?;
        self.setup_access(address, DataSize::U8)?;
        self.transfer_word(address, DataSize::U8, Some(u32::from(data)))?;
        Ok(())
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ArmError> {
        self.check_address(address)?;
        self.setup_access(address, DataSize::U32)?;
        self.stream_words(address, StreamDir::Write(data))
    }

    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), ArmError> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_address(address)?;
        let mut offset = 0usize;
        let mut current = address;
        while current & 0x3 != 0 && offset < data.len() {
            self.write_word_8(current, data[offset])?;
            offset += 1;
            current += 1;
        }
        let words = (data.len() - offset) / 4;
        if words > 0 {
            let buffer: Vec<u32> = data[offset..offset + words * 4]
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
                .collect();
            self.write_32(current, &buffer)?;
            offset += words * 4;
            current += words as u64 * 4;
        }
        while offset < data.len() {
            self.write_word_8(current, data[offset])?;
            offset += 1;
            current += 1;
        }
        Ok(())
    }
}
