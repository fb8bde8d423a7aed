//! Byte-order aware field access for Mach-O headers and load commands.
//!
//! Every multi-byte header or load-command field goes through a
//! [`FieldCodec`], which carries the byte order detected from the image's
//! magic. Code signature blobs are always big-endian and do not use it.

use crate::Result;
use scroll::{Endian, Pread, Pwrite};

/// Reads and writes integer fields in the byte order of one Mach-O image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldCodec {
    endian: Endian,
}

impl FieldCodec {
    /// Codec for the given byte order.
    pub fn new(endian: Endian) -> Self {
        Self { endian }
    }

    pub fn little() -> Self {
        Self::new(Endian::Little)
    }

    pub fn big() -> Self {
        Self::new(Endian::Big)
    }

    /// The byte order fields are encoded in.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn read_u32(&self, data: &[u8], offset: usize) -> Result<u32> {
        Ok(data.pread_with::<u32>(offset, self.endian)?)
    }

    pub fn read_u64(&self, data: &[u8], offset: usize) -> Result<u64> {
        Ok(data.pread_with::<u64>(offset, self.endian)?)
    }

    /// Reads a pointer-sized field: `u64` for 64-bit images, `u32` otherwise.
    pub fn read_word(&self, data: &[u8], offset: usize, is_64: bool) -> Result<u64> {
        if is_64 {
            self.read_u64(data, offset)
        } else {
            self.read_u32(data, offset).map(u64::from)
        }
    }

    pub fn write_u32(&self, data: &mut [u8], offset: usize, value: u32) -> Result<()> {
        data.pwrite_with::<u32>(value, offset, self.endian)?;
        Ok(())
    }

    pub fn write_u64(&self, data: &mut [u8], offset: usize, value: u64) -> Result<()> {
        data.pwrite_with::<u64>(value, offset, self.endian)?;
        Ok(())
    }

    /// Writes a pointer-sized field. For 32-bit images the value must fit in a `u32`.
    pub fn write_word(&self, data: &mut [u8], offset: usize, value: u64, is_64: bool) -> Result<()> {
        if is_64 {
            self.write_u64(data, offset, value)
        } else {
            let narrow = u32::try_from(value).map_err(|_| {
                crate::Error::Format(format!("value {value:#x} does not fit a 32-bit field"))
            })?;
            self.write_u32(data, offset, narrow)
        }
    }
}

/// Aligns a value up to the specified power-of-two alignment.
pub fn align_to(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 16), 0);
        assert_eq!(align_to(1, 16), 16);
        assert_eq!(align_to(15, 16), 16);
        assert_eq!(align_to(16, 16), 16);
        assert_eq!(align_to(17, 16), 32);
        assert_eq!(align_to(100, 0x4000), 0x4000);
    }

    #[test]
    fn test_read_write_u32_le() {
        let codec = FieldCodec::little();
        let mut data = vec![0u8; 8];
        codec.write_u32(&mut data, 0, 0x12345678).unwrap();
        assert_eq!(codec.read_u32(&data, 0).unwrap(), 0x12345678);
        assert_eq!(&data[0..4], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_read_write_u32_be() {
        let codec = FieldCodec::big();
        let mut data = vec![0u8; 8];
        codec.write_u32(&mut data, 0, 0x12345678).unwrap();
        assert_eq!(codec.read_u32(&data, 0).unwrap(), 0x12345678);
        assert_eq!(&data[0..4], &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_word_width() {
        let codec = FieldCodec::little();
        let mut data = vec![0u8; 8];
        codec.write_word(&mut data, 0, 0x1_0000_0000, true).unwrap();
        assert_eq!(codec.read_word(&data, 0, true).unwrap(), 0x1_0000_0000);
        assert!(codec.write_word(&mut data, 0, 0x1_0000_0000, false).is_err());
    }

    #[test]
    fn test_out_of_bounds_is_error() {
        let codec = FieldCodec::big();
        let mut data = vec![0u8; 6];
        assert!(codec.read_u32(&data, 4).is_err());
        assert!(codec.write_u64(&mut data, 0, 1).is_err());
    }
}
