//! Mach-O header decoding.
//!
//! The magic is read little-endian to detect both the bit width and the
//! byte order of the image. The detected [`FieldCodec`] is then used for
//! every other field in the file.

use super::endian::FieldCodec;
use crate::{Error, Result};
use goblin::mach::constants::cputype::{
    CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_X86, CPU_TYPE_X86_64,
};
use goblin::mach::header::{
    filetype_to_str, MH_CIGAM, MH_CIGAM_64, MH_EXECUTE, MH_MAGIC, MH_MAGIC_64,
};
use scroll::{Endian, Pread};

/// Size of `mach_header`.
pub const SIZEOF_HEADER_32: usize = 28;

/// Size of `mach_header_64`.
pub const SIZEOF_HEADER_64: usize = 32;

/// Offset of `ncmds` in both header layouts.
const NCMDS_OFFSET: usize = 16;

/// Decoded Mach-O header of a single architecture slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    /// Only present in 64-bit headers.
    pub reserved: u32,
    is_64: bool,
    codec: FieldCodec,
}

impl Header {
    /// Parses the header at the start of `data`.
    ///
    /// Fails with [`Error::Format`] on a truncated header or an unknown magic.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let magic: u32 = data
            .pread_with(0, Endian::Little)
            .map_err(|_| Error::Format("file too small for a Mach-O magic".into()))?;

        let (is_64, codec) = match magic {
            MH_MAGIC => (false, FieldCodec::little()),
            MH_CIGAM => (false, FieldCodec::big()),
            MH_MAGIC_64 => (true, FieldCodec::little()),
            MH_CIGAM_64 => (true, FieldCodec::big()),
            other => return Err(Error::Format(format!("unknown magic {other:#010x}"))),
        };

        let size = if is_64 { SIZEOF_HEADER_64 } else { SIZEOF_HEADER_32 };
        if data.len() < size {
            return Err(Error::Format(format!(
                "truncated header: {} bytes, need {size}",
                data.len()
            )));
        }

        Ok(Self {
            cputype: codec.read_u32(data, 4)?,
            cpusubtype: codec.read_u32(data, 8)?,
            filetype: codec.read_u32(data, 12)?,
            ncmds: codec.read_u32(data, NCMDS_OFFSET)?,
            sizeofcmds: codec.read_u32(data, NCMDS_OFFSET + 4)?,
            flags: codec.read_u32(data, 24)?,
            reserved: if is_64 { codec.read_u32(data, 28)? } else { 0 },
            is_64,
            codec,
        })
    }

    /// Writes the header back in the image's byte order.
    pub fn write(&self, data: &mut [u8]) -> Result<()> {
        let codec = self.codec;
        codec.write_u32(data, 0, self.magic())?;
        codec.write_u32(data, 4, self.cputype)?;
        codec.write_u32(data, 8, self.cpusubtype)?;
        codec.write_u32(data, 12, self.filetype)?;
        codec.write_u32(data, NCMDS_OFFSET, self.ncmds)?;
        codec.write_u32(data, NCMDS_OFFSET + 4, self.sizeofcmds)?;
        codec.write_u32(data, 24, self.flags)?;
        if self.is_64 {
            codec.write_u32(data, 28, self.reserved)?;
        }
        Ok(())
    }

    /// Native magic for this width; written through the codec it reproduces
    /// the on-disk bytes.
    pub fn magic(&self) -> u32 {
        if self.is_64 {
            MH_MAGIC_64
        } else {
            MH_MAGIC
        }
    }

    pub fn is_64(&self) -> bool {
        self.is_64
    }

    pub fn codec(&self) -> FieldCodec {
        self.codec
    }

    /// Pointer width in bytes; every `cmdsize` is a multiple of it.
    pub fn pointer_size(&self) -> usize {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    /// Size of the header structure, where the load-command table begins.
    pub fn size(&self) -> usize {
        if self.is_64 {
            SIZEOF_HEADER_64
        } else {
            SIZEOF_HEADER_32
        }
    }

    pub fn is_execute(&self) -> bool {
        self.filetype == MH_EXECUTE
    }

    pub fn file_type_name(&self) -> &'static str {
        filetype_to_str(self.filetype)
    }

    pub fn arch_name(&self) -> &'static str {
        match self.cputype {
            CPU_TYPE_ARM64 if self.cpusubtype & 0x00ff_ffff == 2 => "arm64e",
            CPU_TYPE_ARM64 => "arm64",
            CPU_TYPE_X86_64 => "x86_64",
            CPU_TYPE_X86 => "i386",
            CPU_TYPE_ARM => match self.cpusubtype {
                9 => "armv7",
                11 => "armv7s",
                12 => "armv7k",
                _ => "arm",
            },
            _ => "unknown",
        }
    }
}
