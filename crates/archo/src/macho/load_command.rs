//! Typed load commands.
//!
//! Every command in the table is decoded into a [`LoadCommand`] that owns its
//! bytes, so the whole table can be re-serialized from the ordered list after
//! an insertion, removal or resize. Commands this crate never edits are kept
//! verbatim as [`LoadCommand::Other`]. Fixed-size commands whose `cmdsize`
//! disagrees with their structure size are also kept verbatim.

use super::endian::FieldCodec;
use crate::{Error, Result};
use goblin::mach::load_command::{
    cmd_to_str, LC_CODE_SIGNATURE, LC_DATA_IN_CODE, LC_DYLD_INFO, LC_DYLD_INFO_ONLY,
    LC_DYLIB_CODE_SIGN_DRS, LC_DYSYMTAB, LC_ENCRYPTION_INFO, LC_ENCRYPTION_INFO_64,
    LC_FUNCTION_STARTS, LC_LINKER_OPTIMIZATION_HINT, LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB,
    LC_REQ_DYLD, LC_SEGMENT, LC_SEGMENT_64, LC_SEGMENT_SPLIT_INFO, LC_SYMTAB, LC_UUID,
};
use goblin::mach::constants::{S_GB_ZEROFILL, S_THREAD_LOCAL_ZEROFILL, S_ZEROFILL, SECTION_TYPE};
use std::borrow::Cow;

pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;

/// `cmd` + `cmdsize`, shared by every load command.
pub const SIZEOF_LOAD_COMMAND: usize = 8;
pub const SIZEOF_DYLIB_COMMAND: usize = 24;
pub const SIZEOF_LINKEDIT_DATA_COMMAND: usize = 16;
pub const SIZEOF_SYMTAB_COMMAND: usize = 24;
pub const SIZEOF_DYSYMTAB_COMMAND: usize = 80;
pub const SIZEOF_UUID_COMMAND: usize = 24;
pub const SIZEOF_DYLD_INFO_COMMAND: usize = 48;
pub const SIZEOF_ENCRYPTION_INFO_COMMAND: usize = 20;
pub const SIZEOF_ENCRYPTION_INFO_COMMAND_64: usize = 24;
pub const SIZEOF_SEGMENT_COMMAND_32: usize = 56;
pub const SIZEOF_SEGMENT_COMMAND_64: usize = 72;
pub const SIZEOF_SECTION_32: usize = 68;
pub const SIZEOF_SECTION_64: usize = 80;

/// Timestamp written into injected dylib commands.
const INJECTED_DYLIB_TIMESTAMP: u32 = 2;

/// Decodes a fixed-width, NUL-padded name.
pub fn fixed_name(raw: &[u8; 16]) -> Cow<'_, str> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end])
}

/// Encodes a name into a fixed-width, NUL-padded field. Longer names are truncated.
pub fn to_fixed_name(name: &str) -> [u8; 16] {
    let mut raw = [0u8; 16];
    let len = name.len().min(16);
    raw[..len].copy_from_slice(&name.as_bytes()[..len]);
    raw
}

/// Adds `delta` to an absolute file offset that lies at or after `from`.
/// Zero means "absent" in every Mach-O offset field and is never moved.
fn shift_u32(field: &mut u32, from: u64, delta: u64) -> Result<()> {
    if *field != 0 && u64::from(*field) >= from {
        *field = u64::from(*field)
            .checked_add(delta)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Error::Format(format!("file offset {:#x} overflows after growth", field)))?;
    }
    Ok(())
}

fn shift_u64(field: &mut u64, from: u64, delta: u64) -> Result<()> {
    if *field != 0 && *field >= from {
        *field = field
            .checked_add(delta)
            .ok_or_else(|| Error::Format(format!("file offset {:#x} overflows after growth", field)))?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    /// Only present in `section_64`.
    pub reserved3: u32,
}

impl Section {
    pub fn name(&self) -> Cow<'_, str> {
        fixed_name(&self.sectname)
    }

    /// True for sections that occupy no file space.
    pub fn is_zerofill(&self) -> bool {
        matches!(
            self.flags & SECTION_TYPE,
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        )
    }

    fn size_of(is_64: bool) -> usize {
        if is_64 {
            SIZEOF_SECTION_64
        } else {
            SIZEOF_SECTION_32
        }
    }

    fn parse(data: &[u8], offset: usize, codec: FieldCodec, is_64: bool) -> Result<Self> {
        let mut sectname = [0u8; 16];
        let mut segname = [0u8; 16];
        sectname.copy_from_slice(&data[offset..offset + 16]);
        segname.copy_from_slice(&data[offset + 16..offset + 32]);
        let w = if is_64 { 8 } else { 4 };
        let tail = offset + 32 + 2 * w;
        Ok(Self {
            sectname,
            segname,
            addr: codec.read_word(data, offset + 32, is_64)?,
            size: codec.read_word(data, offset + 32 + w, is_64)?,
            offset: codec.read_u32(data, tail)?,
            align: codec.read_u32(data, tail + 4)?,
            reloff: codec.read_u32(data, tail + 8)?,
            nreloc: codec.read_u32(data, tail + 12)?,
            flags: codec.read_u32(data, tail + 16)?,
            reserved1: codec.read_u32(data, tail + 20)?,
            reserved2: codec.read_u32(data, tail + 24)?,
            reserved3: if is_64 { codec.read_u32(data, tail + 28)? } else { 0 },
        })
    }

    fn write(&self, out: &mut [u8], offset: usize, codec: FieldCodec, is_64: bool) -> Result<()> {
        out[offset..offset + 16].copy_from_slice(&self.sectname);
        out[offset + 16..offset + 32].copy_from_slice(&self.segname);
        let w = if is_64 { 8 } else { 4 };
        let tail = offset + 32 + 2 * w;
        codec.write_word(out, offset + 32, self.addr, is_64)?;
        codec.write_word(out, offset + 32 + w, self.size, is_64)?;
        codec.write_u32(out, tail, self.offset)?;
        codec.write_u32(out, tail + 4, self.align)?;
        codec.write_u32(out, tail + 8, self.reloff)?;
        codec.write_u32(out, tail + 12, self.nreloc)?;
        codec.write_u32(out, tail + 16, self.flags)?;
        codec.write_u32(out, tail + 20, self.reserved1)?;
        codec.write_u32(out, tail + 24, self.reserved2)?;
        if is_64 {
            codec.write_u32(out, tail + 28, self.reserved3)?;
        }
        Ok(())
    }
}

/// `LC_SEGMENT` / `LC_SEGMENT_64` with its sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub flags: u32,
    pub sections: Vec<Section>,
    /// Bytes past the last section, kept so the command re-encodes unchanged.
    tail: Vec<u8>,
    is_64: bool,
}

impl Segment {
    pub fn name(&self) -> Cow<'_, str> {
        fixed_name(&self.segname)
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.segname == to_fixed_name(name)
    }

    pub fn is_64(&self) -> bool {
        self.is_64
    }

    /// End of the segment's file range.
    pub fn file_end(&self) -> u64 {
        self.fileoff.saturating_add(self.filesize)
    }

    fn header_size(is_64: bool) -> usize {
        if is_64 {
            SIZEOF_SEGMENT_COMMAND_64
        } else {
            SIZEOF_SEGMENT_COMMAND_32
        }
    }

    fn cmdsize(&self) -> usize {
        Self::header_size(self.is_64) + self.sections.len() * Section::size_of(self.is_64) + self.tail.len()
    }

    fn parse(data: &[u8], codec: FieldCodec, is_64: bool) -> Result<Self> {
        let header = Self::header_size(is_64);
        if data.len() < header {
            return Err(Error::Format(format!(
                "segment command of {} bytes is shorter than {header}",
                data.len()
            )));
        }
        let mut segname = [0u8; 16];
        segname.copy_from_slice(&data[8..24]);
        let w = if is_64 { 8 } else { 4 };
        let prot = 24 + 4 * w;
        let nsects = codec.read_u32(data, prot + 8)? as usize;
        let sections_end = nsects
            .checked_mul(Section::size_of(is_64))
            .and_then(|n| n.checked_add(header))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::Format(format!(
                    "segment {} declares {nsects} sections beyond its cmdsize",
                    fixed_name(&segname)
                ))
            })?;

        let sections = (0..nsects)
            .map(|i| Section::parse(data, header + i * Section::size_of(is_64), codec, is_64))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            segname,
            vmaddr: codec.read_word(data, 24, is_64)?,
            vmsize: codec.read_word(data, 24 + w, is_64)?,
            fileoff: codec.read_word(data, 24 + 2 * w, is_64)?,
            filesize: codec.read_word(data, 24 + 3 * w, is_64)?,
            maxprot: codec.read_u32(data, prot)?,
            initprot: codec.read_u32(data, prot + 4)?,
            flags: codec.read_u32(data, prot + 12)?,
            sections,
            tail: data[sections_end..].to_vec(),
            is_64,
        })
    }

    fn write(&self, out: &mut [u8], codec: FieldCodec) -> Result<()> {
        let is_64 = self.is_64;
        let w = if is_64 { 8 } else { 4 };
        let prot = 24 + 4 * w;
        out[8..24].copy_from_slice(&self.segname);
        codec.write_word(out, 24, self.vmaddr, is_64)?;
        codec.write_word(out, 24 + w, self.vmsize, is_64)?;
        codec.write_word(out, 24 + 2 * w, self.fileoff, is_64)?;
        codec.write_word(out, 24 + 3 * w, self.filesize, is_64)?;
        codec.write_u32(out, prot, self.maxprot)?;
        codec.write_u32(out, prot + 4, self.initprot)?;
        codec.write_u32(out, prot + 8, self.sections.len() as u32)?;
        codec.write_u32(out, prot + 12, self.flags)?;
        let header = Self::header_size(is_64);
        for (i, section) in self.sections.iter().enumerate() {
            section.write(out, header + i * Section::size_of(is_64), codec, is_64)?;
        }
        let tail_start = out.len() - self.tail.len();
        out[tail_start..].copy_from_slice(&self.tail);
        Ok(())
    }

    fn shift_file_offsets(&mut self, from: u64, delta: u64) -> Result<()> {
        shift_u64(&mut self.fileoff, from, delta)?;
        for section in &mut self.sections {
            shift_u32(&mut section.offset, from, delta)?;
            shift_u32(&mut section.reloff, from, delta)?;
        }
        Ok(())
    }
}

/// `LC_LOAD_DYLIB` / `LC_LOAD_WEAK_DYLIB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibCommand {
    pub name_offset: u32,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
    /// Everything after the fixed struct: the NUL-terminated path plus padding.
    payload: Vec<u8>,
}

impl DylibCommand {
    /// A fresh command carrying `path`, padded so `cmdsize` stays 8-aligned.
    /// At least one NUL always follows the path.
    pub fn new(path: &str) -> Self {
        let padding = 8 - path.len() % 8;
        let mut payload = Vec::with_capacity(path.len() + padding);
        payload.extend_from_slice(path.as_bytes());
        payload.resize(path.len() + padding, 0);
        Self {
            name_offset: SIZEOF_DYLIB_COMMAND as u32,
            timestamp: INJECTED_DYLIB_TIMESTAMP,
            current_version: 0,
            compatibility_version: 0,
            payload,
        }
    }

    fn parse(data: &[u8], codec: FieldCodec) -> Result<Self> {
        if data.len() < SIZEOF_DYLIB_COMMAND {
            return Err(Error::Format(format!("dylib command of {} bytes", data.len())));
        }
        let name_offset = codec.read_u32(data, 8)?;
        if (name_offset as usize) < SIZEOF_DYLIB_COMMAND || name_offset as usize > data.len() {
            return Err(Error::Format(format!(
                "dylib name offset {name_offset} outside command of {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            name_offset,
            timestamp: codec.read_u32(data, 12)?,
            current_version: codec.read_u32(data, 16)?,
            compatibility_version: codec.read_u32(data, 20)?,
            payload: data[SIZEOF_DYLIB_COMMAND..].to_vec(),
        })
    }

    fn write(&self, out: &mut [u8], codec: FieldCodec) -> Result<()> {
        codec.write_u32(out, 8, self.name_offset)?;
        codec.write_u32(out, 12, self.timestamp)?;
        codec.write_u32(out, 16, self.current_version)?;
        codec.write_u32(out, 20, self.compatibility_version)?;
        out[SIZEOF_DYLIB_COMMAND..].copy_from_slice(&self.payload);
        Ok(())
    }

    pub fn cmdsize(&self) -> usize {
        SIZEOF_DYLIB_COMMAND + self.payload.len()
    }

    fn name_area(&self) -> &[u8] {
        &self.payload[self.name_offset as usize - SIZEOF_DYLIB_COMMAND..]
    }

    /// Raw path bytes up to the terminating NUL.
    pub fn path_bytes(&self) -> &[u8] {
        let area = self.name_area();
        let end = area.iter().position(|&b| b == 0).unwrap_or(area.len());
        &area[..end]
    }

    pub fn path(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.path_bytes())
    }

    /// Bytes available for a path, including its terminating NUL.
    pub fn capacity(&self) -> usize {
        self.name_area().len()
    }

    pub fn fits(&self, path: &str) -> bool {
        path.len() < self.capacity()
    }

    /// Rewrites the path in place and zero-pads the rest of the name area.
    pub fn set_path(&mut self, path: &str) -> Result<()> {
        if !self.fits(path) {
            return Err(Error::Capacity(format!(
                "{path} needs {} bytes, dylib command holds {}",
                path.len() + 1,
                self.capacity()
            )));
        }
        let start = self.name_offset as usize - SIZEOF_DYLIB_COMMAND;
        let area = &mut self.payload[start..];
        area.fill(0);
        area[..path.len()].copy_from_slice(path.as_bytes());
        Ok(())
    }

    /// Copy of this command re-laid out around a different path. Version
    /// fields are preserved and the path moves to directly after the struct.
    pub fn with_path(&self, path: &str) -> Self {
        Self {
            timestamp: self.timestamp,
            current_version: self.current_version,
            compatibility_version: self.compatibility_version,
            ..Self::new(path)
        }
    }
}

/// `linkedit_data_command`: `LC_CODE_SIGNATURE`, `LC_FUNCTION_STARTS` and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkeditData {
    pub cmd: u32,
    pub dataoff: u32,
    pub datasize: u32,
}

impl LinkeditData {
    pub fn data_end(&self) -> u64 {
        u64::from(self.dataoff) + u64::from(self.datasize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symtab {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

/// `LC_DYSYMTAB`, kept as its 18 raw fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicSymtab {
    pub fields: [u32; 18],
}

impl DynamicSymtab {
    /// Indices of `tocoff`, `modtaboff`, `extrefsymoff`, `indirectsymoff`,
    /// `extreloff` and `locreloff` within `fields`.
    const OFFSET_FIELDS: [usize; 6] = [6, 8, 10, 12, 14, 16];
}

/// `LC_DYLD_INFO` / `LC_DYLD_INFO_ONLY`: five (offset, size) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DyldInfo {
    pub cmd: u32,
    pub fields: [u32; 10],
}

/// `LC_ENCRYPTION_INFO` / `LC_ENCRYPTION_INFO_64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInfo {
    pub cmd: u32,
    pub cryptoff: u32,
    pub cryptsize: u32,
    pub cryptid: u32,
    /// Trailing pad of the 64-bit variant.
    pub pad: Option<u32>,
}

/// One entry of the load-command table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadCommand {
    Segment(Segment),
    Symtab(Symtab),
    DynamicSymtab(DynamicSymtab),
    LoadDylib(DylibCommand),
    LoadWeakDylib(DylibCommand),
    CodeSignature(LinkeditData),
    Uuid([u8; 16]),
    LinkeditData(LinkeditData),
    DyldInfo(DyldInfo),
    EncryptionInfo(EncryptionInfo),
    /// Any other command, stored whole including its `cmd`/`cmdsize` header.
    Other { cmd: u32, data: Vec<u8> },
}

impl LoadCommand {
    /// Decodes one command. `data` is exactly `cmdsize` bytes long.
    pub fn parse(data: &[u8], codec: FieldCodec, is_64: bool) -> Result<Self> {
        let cmd = codec.read_u32(data, 0)?;
        let size = data.len();
        let other = || LoadCommand::Other {
            cmd,
            data: data.to_vec(),
        };

        let command = match cmd {
            LC_SEGMENT if !is_64 => LoadCommand::Segment(Segment::parse(data, codec, false)?),
            LC_SEGMENT_64 if is_64 => LoadCommand::Segment(Segment::parse(data, codec, true)?),
            LC_LOAD_DYLIB => LoadCommand::LoadDylib(DylibCommand::parse(data, codec)?),
            LC_LOAD_WEAK_DYLIB => LoadCommand::LoadWeakDylib(DylibCommand::parse(data, codec)?),
            LC_SYMTAB if size == SIZEOF_SYMTAB_COMMAND => LoadCommand::Symtab(Symtab {
                symoff: codec.read_u32(data, 8)?,
                nsyms: codec.read_u32(data, 12)?,
                stroff: codec.read_u32(data, 16)?,
                strsize: codec.read_u32(data, 20)?,
            }),
            LC_DYSYMTAB if size == SIZEOF_DYSYMTAB_COMMAND => {
                let mut fields = [0u32; 18];
                for (i, field) in fields.iter_mut().enumerate() {
                    *field = codec.read_u32(data, 8 + i * 4)?;
                }
                LoadCommand::DynamicSymtab(DynamicSymtab { fields })
            }
            LC_UUID if size == SIZEOF_UUID_COMMAND => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&data[8..24]);
                LoadCommand::Uuid(uuid)
            }
            LC_CODE_SIGNATURE
            | LC_SEGMENT_SPLIT_INFO
            | LC_FUNCTION_STARTS
            | LC_DATA_IN_CODE
            | LC_DYLIB_CODE_SIGN_DRS
            | LC_LINKER_OPTIMIZATION_HINT
            | LC_DYLD_EXPORTS_TRIE
            | LC_DYLD_CHAINED_FIXUPS
                if size == SIZEOF_LINKEDIT_DATA_COMMAND =>
            {
                let linkedit = LinkeditData {
                    cmd,
                    dataoff: codec.read_u32(data, 8)?,
                    datasize: codec.read_u32(data, 12)?,
                };
                if cmd == LC_CODE_SIGNATURE {
                    LoadCommand::CodeSignature(linkedit)
                } else {
                    LoadCommand::LinkeditData(linkedit)
                }
            }
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY if size == SIZEOF_DYLD_INFO_COMMAND => {
                let mut fields = [0u32; 10];
                for (i, field) in fields.iter_mut().enumerate() {
                    *field = codec.read_u32(data, 8 + i * 4)?;
                }
                LoadCommand::DyldInfo(DyldInfo { cmd, fields })
            }
            LC_ENCRYPTION_INFO if size == SIZEOF_ENCRYPTION_INFO_COMMAND => {
                LoadCommand::EncryptionInfo(EncryptionInfo {
                    cmd,
                    cryptoff: codec.read_u32(data, 8)?,
                    cryptsize: codec.read_u32(data, 12)?,
                    cryptid: codec.read_u32(data, 16)?,
                    pad: None,
                })
            }
            LC_ENCRYPTION_INFO_64 if size == SIZEOF_ENCRYPTION_INFO_COMMAND_64 => {
                LoadCommand::EncryptionInfo(EncryptionInfo {
                    cmd,
                    cryptoff: codec.read_u32(data, 8)?,
                    cryptsize: codec.read_u32(data, 12)?,
                    cryptid: codec.read_u32(data, 16)?,
                    pad: Some(codec.read_u32(data, 20)?),
                })
            }
            _ => other(),
        };
        Ok(command)
    }

    pub fn cmd(&self) -> u32 {
        match self {
            LoadCommand::Segment(seg) if seg.is_64 => LC_SEGMENT_64,
            LoadCommand::Segment(_) => LC_SEGMENT,
            LoadCommand::Symtab(_) => LC_SYMTAB,
            LoadCommand::DynamicSymtab(_) => LC_DYSYMTAB,
            LoadCommand::LoadDylib(_) => LC_LOAD_DYLIB,
            LoadCommand::LoadWeakDylib(_) => LC_LOAD_WEAK_DYLIB,
            LoadCommand::CodeSignature(_) => LC_CODE_SIGNATURE,
            LoadCommand::Uuid(_) => LC_UUID,
            LoadCommand::LinkeditData(l) => l.cmd,
            LoadCommand::DyldInfo(d) => d.cmd,
            LoadCommand::EncryptionInfo(e) => e.cmd,
            LoadCommand::Other { cmd, .. } => *cmd,
        }
    }

    pub fn cmdsize(&self) -> usize {
        match self {
            LoadCommand::Segment(seg) => seg.cmdsize(),
            LoadCommand::Symtab(_) => SIZEOF_SYMTAB_COMMAND,
            LoadCommand::DynamicSymtab(_) => SIZEOF_DYSYMTAB_COMMAND,
            LoadCommand::LoadDylib(d) | LoadCommand::LoadWeakDylib(d) => d.cmdsize(),
            LoadCommand::CodeSignature(_) | LoadCommand::LinkeditData(_) => {
                SIZEOF_LINKEDIT_DATA_COMMAND
            }
            LoadCommand::Uuid(_) => SIZEOF_UUID_COMMAND,
            LoadCommand::DyldInfo(_) => SIZEOF_DYLD_INFO_COMMAND,
            LoadCommand::EncryptionInfo(e) if e.pad.is_some() => SIZEOF_ENCRYPTION_INFO_COMMAND_64,
            LoadCommand::EncryptionInfo(_) => SIZEOF_ENCRYPTION_INFO_COMMAND,
            LoadCommand::Other { data, .. } => data.len(),
        }
    }

    pub fn name(&self) -> &'static str {
        cmd_to_str(self.cmd())
    }

    /// The dylib command, for either strong or weak variants.
    pub fn as_dylib(&self) -> Option<&DylibCommand> {
        match self {
            LoadCommand::LoadDylib(d) | LoadCommand::LoadWeakDylib(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dylib_mut(&mut self) -> Option<&mut DylibCommand> {
        match self {
            LoadCommand::LoadDylib(d) | LoadCommand::LoadWeakDylib(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            LoadCommand::Segment(seg) => Some(seg),
            _ => None,
        }
    }

    /// Encodes the command in the image's byte order.
    pub fn to_bytes(&self, codec: FieldCodec) -> Result<Vec<u8>> {
        if let LoadCommand::Other { data, .. } = self {
            return Ok(data.clone());
        }

        let size = self.cmdsize();
        let mut out = vec![0u8; size];
        codec.write_u32(&mut out, 0, self.cmd())?;
        codec.write_u32(&mut out, 4, size as u32)?;

        match self {
            LoadCommand::Segment(seg) => seg.write(&mut out, codec)?,
            LoadCommand::Symtab(s) => {
                codec.write_u32(&mut out, 8, s.symoff)?;
                codec.write_u32(&mut out, 12, s.nsyms)?;
                codec.write_u32(&mut out, 16, s.stroff)?;
                codec.write_u32(&mut out, 20, s.strsize)?;
            }
            LoadCommand::DynamicSymtab(d) => {
                for (i, field) in d.fields.iter().enumerate() {
                    codec.write_u32(&mut out, 8 + i * 4, *field)?;
                }
            }
            LoadCommand::LoadDylib(d) | LoadCommand::LoadWeakDylib(d) => d.write(&mut out, codec)?,
            LoadCommand::CodeSignature(l) | LoadCommand::LinkeditData(l) => {
                codec.write_u32(&mut out, 8, l.dataoff)?;
                codec.write_u32(&mut out, 12, l.datasize)?;
            }
            LoadCommand::Uuid(uuid) => out[8..24].copy_from_slice(uuid),
            LoadCommand::DyldInfo(d) => {
                for (i, field) in d.fields.iter().enumerate() {
                    codec.write_u32(&mut out, 8 + i * 4, *field)?;
                }
            }
            LoadCommand::EncryptionInfo(e) => {
                codec.write_u32(&mut out, 8, e.cryptoff)?;
                codec.write_u32(&mut out, 12, e.cryptsize)?;
                codec.write_u32(&mut out, 16, e.cryptid)?;
                if let Some(pad) = e.pad {
                    codec.write_u32(&mut out, 20, pad)?;
                }
            }
            LoadCommand::Other { .. } => {}
        }
        Ok(out)
    }

    /// Moves every absolute file offset at or after `from` by `delta` bytes.
    pub fn shift_file_offsets(&mut self, from: u64, delta: u64) -> Result<()> {
        match self {
            LoadCommand::Segment(seg) => seg.shift_file_offsets(from, delta)?,
            LoadCommand::Symtab(s) => {
                shift_u32(&mut s.symoff, from, delta)?;
                shift_u32(&mut s.stroff, from, delta)?;
            }
            LoadCommand::DynamicSymtab(d) => {
                for i in DynamicSymtab::OFFSET_FIELDS {
                    shift_u32(&mut d.fields[i], from, delta)?;
                }
            }
            LoadCommand::CodeSignature(l) | LoadCommand::LinkeditData(l) => {
                shift_u32(&mut l.dataoff, from, delta)?;
            }
            LoadCommand::DyldInfo(d) => {
                for i in (0..d.fields.len()).step_by(2) {
                    shift_u32(&mut d.fields[i], from, delta)?;
                }
            }
            LoadCommand::EncryptionInfo(e) => shift_u32(&mut e.cryptoff, from, delta)?,
            LoadCommand::LoadDylib(_)
            | LoadCommand::LoadWeakDylib(_)
            | LoadCommand::Uuid(_)
            | LoadCommand::Other { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le() -> FieldCodec {
        FieldCodec::little()
    }

    fn dylib_bytes(codec: FieldCodec, path: &str, cmdsize: usize) -> Vec<u8> {
        let mut data = vec![0u8; cmdsize];
        codec.write_u32(&mut data, 0, LC_LOAD_DYLIB).unwrap();
        codec.write_u32(&mut data, 4, cmdsize as u32).unwrap();
        codec.write_u32(&mut data, 8, 24).unwrap();
        codec.write_u32(&mut data, 12, 2).unwrap();
        codec.write_u32(&mut data, 16, 0x10000).unwrap();
        codec.write_u32(&mut data, 20, 0x10000).unwrap();
        data[24..24 + path.len()].copy_from_slice(path.as_bytes());
        data
    }

    #[test]
    fn test_new_dylib_padding() {
        let cmd = DylibCommand::new("/usr/lib/libz.dylib");
        // 19 bytes of path, padded by 5 to 24
        assert_eq!(cmd.cmdsize(), 48);
        assert_eq!(cmd.capacity(), 24);
        assert_eq!(cmd.path(), "/usr/lib/libz.dylib");
        assert_eq!(cmd.timestamp, 2);

        // An exact multiple of eight still gets a full block of NULs.
        let cmd = DylibCommand::new("/a/b.dyl");
        assert_eq!(cmd.cmdsize(), 24 + 16);
    }

    #[test]
    fn test_dylib_roundtrip_both_orders() {
        for codec in [FieldCodec::little(), FieldCodec::big()] {
            let raw = dylib_bytes(codec, "/usr/lib/libA.dylib", 48);
            let cmd = LoadCommand::parse(&raw, codec, true).unwrap();
            assert_eq!(cmd.as_dylib().unwrap().path(), "/usr/lib/libA.dylib");
            assert_eq!(cmd.to_bytes(codec).unwrap(), raw);
        }
    }

    #[test]
    fn test_set_path_respects_capacity() {
        let raw = dylib_bytes(le(), "/usr/lib/libA.dylib", 48);
        let mut cmd = DylibCommand::parse(&raw, le()).unwrap();
        assert!(cmd.set_path("/usr/lib/libTooLongNameThatExceedsCapacity.dylib").is_err());
        assert_eq!(cmd.path(), "/usr/lib/libA.dylib");

        cmd.set_path("/b.dylib").unwrap();
        assert_eq!(cmd.path(), "/b.dylib");
        assert!(cmd.name_area()[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_with_path_keeps_versions() {
        let raw = dylib_bytes(le(), "/x.dylib", 32);
        let cmd = DylibCommand::parse(&raw, le()).unwrap();
        let wide = cmd.with_path("/a/much/longer/path/than/before.dylib");
        assert_eq!(wide.current_version, 0x10000);
        assert_eq!(wide.timestamp, 2);
        assert_eq!(wide.cmdsize() % 8, 0);
        assert_eq!(wide.path(), "/a/much/longer/path/than/before.dylib");
    }

    #[test]
    fn test_bad_name_offset() {
        let mut raw = dylib_bytes(le(), "/x.dylib", 32);
        le().write_u32(&mut raw, 8, 64).unwrap();
        assert!(LoadCommand::parse(&raw, le(), true).is_err());
    }

    #[test]
    fn test_segment_roundtrip_and_shift() {
        let codec = le();
        let mut raw = vec![0u8; SIZEOF_SEGMENT_COMMAND_64 + SIZEOF_SECTION_64];
        codec.write_u32(&mut raw, 0, LC_SEGMENT_64).unwrap();
        let raw_len = raw.len() as u32;
        codec.write_u32(&mut raw, 4, raw_len).unwrap();
        raw[8..14].copy_from_slice(b"__DATA");
        codec.write_u64(&mut raw, 40, 0x8000).unwrap(); // fileoff
        codec.write_u64(&mut raw, 48, 0x4000).unwrap(); // filesize
        codec.write_u32(&mut raw, 64, 1).unwrap(); // nsects
        raw[72..78].copy_from_slice(b"__data");
        codec.write_u32(&mut raw, 72 + 48, 0x8100).unwrap(); // section offset

        let mut cmd = LoadCommand::parse(&raw, codec, true).unwrap();
        assert_eq!(cmd.to_bytes(codec).unwrap(), raw);

        let seg = cmd.as_segment().unwrap();
        assert!(seg.is_named("__DATA"));
        assert_eq!(seg.sections[0].name(), "__data");

        cmd.shift_file_offsets(0x8000, 0x100).unwrap();
        let seg = cmd.as_segment().unwrap();
        assert_eq!(seg.fileoff, 0x8100);
        assert_eq!(seg.sections[0].offset, 0x8200);
        assert_eq!(seg.filesize, 0x4000);
    }

    #[test]
    fn test_segment_sections_overrun() {
        let codec = le();
        let mut raw = vec![0u8; SIZEOF_SEGMENT_COMMAND_64];
        codec.write_u32(&mut raw, 0, LC_SEGMENT_64).unwrap();
        let raw_len = raw.len() as u32;
        codec.write_u32(&mut raw, 4, raw_len).unwrap();
        codec.write_u32(&mut raw, 64, 3).unwrap();
        assert!(matches!(
            LoadCommand::parse(&raw, codec, true),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_odd_sized_fixed_command_kept_raw() {
        let codec = le();
        let mut raw = vec![0u8; 24];
        codec.write_u32(&mut raw, 0, LC_CODE_SIGNATURE).unwrap();
        codec.write_u32(&mut raw, 4, 24).unwrap();
        let cmd = LoadCommand::parse(&raw, codec, true).unwrap();
        assert!(matches!(cmd, LoadCommand::Other { .. }));
        assert_eq!(cmd.to_bytes(codec).unwrap(), raw);
    }

    #[test]
    fn test_shift_leaves_earlier_and_absent_offsets() {
        let mut cmd = LoadCommand::Symtab(Symtab {
            symoff: 0x100,
            nsyms: 4,
            stroff: 0,
            strsize: 0,
        });
        cmd.shift_file_offsets(0x200, 0x10).unwrap();
        assert_eq!(cmd, LoadCommand::Symtab(Symtab { symoff: 0x100, nsyms: 4, stroff: 0, strsize: 0 }));

        let mut sig = LoadCommand::CodeSignature(LinkeditData {
            cmd: LC_CODE_SIGNATURE,
            dataoff: 0x300,
            datasize: 0x40,
        });
        sig.shift_file_offsets(0x200, 0x10).unwrap();
        assert!(matches!(sig, LoadCommand::CodeSignature(l) if l.dataoff == 0x310));
    }

    #[test]
    fn test_shift_overflow_is_error() {
        let mut cmd = LoadCommand::LinkeditData(LinkeditData {
            cmd: LC_FUNCTION_STARTS,
            dataoff: u32::MAX - 1,
            datasize: 0,
        });
        assert!(cmd.shift_file_offsets(0, 16).is_err());
    }

    #[test]
    fn test_fixed_names() {
        assert_eq!(fixed_name(&to_fixed_name("__LINKEDIT")), "__LINKEDIT");
        assert_eq!(to_fixed_name("__TEXT")[6..], [0u8; 10]);
    }
}
