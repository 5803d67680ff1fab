//! Generic, architecture independent memory access.

use crate::error::Error;

/// Memory access as exposed on a [`crate::Target`].
///
/// Addresses are 64 bit wide throughout; 32-bit cores reject addresses
/// above 4 GiB. Accesses larger than the bus width are split by the
/// implementation; unaligned accesses are legal and handled with narrow
/// head/tail transfers where the hardware requires it.
pub trait MemoryInterface {
    /// Does this interface support native 64-bit wide accesses?
    fn supports_native_64bit_access(&mut self) -> bool {
        false
    }

    /// Read a 32-bit word.
    fn read_word_32(&mut self, address: u64) -> Result<u32, Error>;

    /// Read a 16-bit half-word.
    fn read_word_16(&mut self, address: u64) -> Result<u16, Error>;

    /// Read a byte.
    fn read_word_8(&mut self, address: u64) -> Result<u8, Error>;

    /// Read a 64-bit word.
    fn read_word_64(&mut self, address: u64) -> Result<u64, Error> {
        let low = self.read_word_32(address)? as u64;
        let high = self.read_word_32(address + 4)? as u64;
        Ok(low | (high << 32))
    }

    /// Read a block of 32-bit words.
    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), Error>;

    /// Read a block of bytes.
    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error>;

    /// Write a 32-bit word.
    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), Error>;

    /// Write a 16-bit half-word.
    fn write_word_16(&mut self, address: u64, data: u16) -> Result<(), Error>;

    /// Write a byte.
    fn write_word_8(&mut self, address: u64, data: u8) -> Result<(), Error>;

    /// Write a 64-bit word.
    fn write_word_64(&mut self, address: u64, data: u64) -> Result<(), Error> {
        self.write_word_32(address, data as u32)?;
        self.write_word_32(address + 4, (data >> 32) as u32)
    }

    /// Write a block of 32-bit words.
    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), Error>;

    /// Write a block of bytes.
    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), Error>;
}
