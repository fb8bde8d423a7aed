//! Owned, editable view of one Mach-O architecture slice.
//!
//! [`MachOContainer`] keeps the raw image bytes together with the decoded
//! header and the ordered load-command list. Structural edits go through
//! [`MachOContainer::replace_commands`], which validates the new table against
//! the space before the first section and only then rewrites the header and
//! the table bytes. Segment and signature lookups are computed from the
//! current command list on every call; nothing caches absolute positions.

use super::endian::FieldCodec;
use super::header::Header;
use super::load_command::{LinkeditData, LoadCommand, Segment, SIZEOF_LOAD_COMMAND};
use crate::codesign::reader::EmbeddedSignature;
use crate::{Error, Result};
use goblin::mach::constants::{SEG_LINKEDIT, SEG_TEXT};
use log::{debug, info};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::path::Path;

/// A parsed, editable Mach-O slice.
#[derive(Debug, Clone)]
pub struct MachOContainer {
    data: Vec<u8>,
    header: Header,
    commands: Vec<LoadCommand>,
}

impl MachOContainer {
    /// Parses a single-architecture Mach-O image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if:
    /// - The header is truncated or the magic is unknown
    /// - A command has a zero `cmdsize` or one that is not a multiple of the
    ///   pointer width
    /// - The command table overruns `sizeofcmds` or the file
    /// - A segment's or section's file range lies outside the image
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let header = Header::parse(&data)?;
        let codec = header.codec();
        let start = header.size();
        let end = start
            .checked_add(header.sizeofcmds as usize)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::Format(format!(
                    "sizeofcmds {} exceeds file of {} bytes",
                    header.sizeofcmds,
                    data.len()
                ))
            })?;

        let align = header.pointer_size();
        let mut commands = Vec::with_capacity(header.ncmds as usize);
        let mut offset = start;
        for index in 0..header.ncmds {
            if offset + SIZEOF_LOAD_COMMAND > end {
                return Err(Error::Format(format!(
                    "load command {index} at {offset:#x} overruns sizeofcmds"
                )));
            }
            let cmdsize = codec.read_u32(&data, offset + 4)? as usize;
            if cmdsize < SIZEOF_LOAD_COMMAND || cmdsize % align != 0 {
                return Err(Error::Format(format!(
                    "load command {index} at {offset:#x} has invalid cmdsize {cmdsize}"
                )));
            }
            if offset + cmdsize > end {
                return Err(Error::Format(format!(
                    "load command {index} at {offset:#x} overruns sizeofcmds"
                )));
            }
            commands.push(LoadCommand::parse(
                &data[offset..offset + cmdsize],
                codec,
                header.is_64(),
            )?);
            offset += cmdsize;
        }
        if offset != end {
            return Err(Error::Format(format!(
                "load commands occupy {} bytes but sizeofcmds is {}",
                offset - start,
                header.sizeofcmds
            )));
        }

        for seg in commands.iter().filter_map(LoadCommand::as_segment) {
            if seg.file_end() > data.len() as u64 {
                return Err(Error::Format(format!(
                    "segment {} file range {:#x}+{:#x} exceeds file of {} bytes",
                    seg.name(),
                    seg.fileoff,
                    seg.filesize,
                    data.len()
                )));
            }
            for section in &seg.sections {
                let end = if section.is_zerofill() {
                    u64::from(section.offset)
                } else {
                    u64::from(section.offset).saturating_add(section.size)
                };
                if section.offset != 0 && end > data.len() as u64 {
                    return Err(Error::Format(format!(
                        "section {},{} file range {:#x}+{:#x} exceeds file of {} bytes",
                        seg.name(),
                        section.name(),
                        section.offset,
                        section.size,
                        data.len()
                    )));
                }
            }
        }

        debug!(
            "parsed {} {} slice: {} load commands, {} bytes",
            header.arch_name(),
            header.file_type_name(),
            commands.len(),
            data.len()
        );

        Ok(Self {
            data,
            header,
            commands,
        })
    }

    /// Reads and parses a Mach-O slice from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(std::fs::read(path.as_ref())?)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The byte-order accessor for header and load-command fields.
    pub fn codec(&self) -> FieldCodec {
        self.header.codec()
    }

    pub fn commands(&self) -> &[LoadCommand] {
        &self.commands
    }

    /// Current image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the container and hands back the image bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// True iff the slice is a main executable (not a library or bundle).
    pub fn is_execute(&self) -> bool {
        self.header.is_execute()
    }

    /// True when an encryption-info command marks the slice as encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c, LoadCommand::EncryptionInfo(e) if e.cryptid != 0))
    }

    /// Paths of every `LC_LOAD_DYLIB` / `LC_LOAD_WEAK_DYLIB`, in table order.
    pub fn dylibs(&self) -> impl Iterator<Item = Cow<'_, str>> + '_ {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_dylib)
            .map(|d| d.path())
    }

    pub fn list_dylibs(&self) -> Vec<String> {
        self.dylibs().map(Cow::into_owned).collect()
    }

    /// Rewrites the path of the first dylib command matching `old` exactly.
    ///
    /// The command is never resized: `new` plus its NUL must fit in the
    /// command's existing name area.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no dylib command carries `old`
    /// - [`Error::Capacity`] if `new` does not fit; the original path is kept
    pub fn change_dylib_path(&mut self, old: &str, new: &str) -> Result<()> {
        let index = self
            .find_dylib(old)
            .ok_or_else(|| Error::NotFound(old.to_string()))?;

        let mut commands = self.commands.clone();
        if let Some(dylib) = commands[index].as_dylib_mut() {
            dylib.set_path(new)?;
        }
        self.replace_commands(commands)?;
        info!("changed dylib {old} -> {new}");
        Ok(())
    }

    /// Removes every dylib command whose path is in `names`.
    ///
    /// Returns how many commands were removed. Unknown names are ignored;
    /// when nothing matches, the image is left untouched.
    pub fn uninstall_dylibs(&mut self, names: &BTreeSet<String>) -> Result<usize> {
        let before = self.commands.len();
        let commands: Vec<LoadCommand> = self
            .commands
            .iter()
            .filter(|c| match c.as_dylib() {
                Some(d) => !names.contains(d.path().as_ref()),
                None => true,
            })
            .cloned()
            .collect();

        let removed = before - commands.len();
        if removed == 0 {
            return Ok(0);
        }
        self.replace_commands(commands)?;
        info!("removed {removed} dylib load command(s)");
        Ok(removed)
    }

    /// Index of the first dylib command whose path equals `path`.
    pub fn find_dylib(&self, path: &str) -> Option<usize> {
        self.commands
            .iter()
            .position(|c| c.as_dylib().is_some_and(|d| d.path_bytes() == path.as_bytes()))
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_segment)
            .find(|seg| seg.is_named(name))
    }

    pub fn linkedit(&self) -> Option<&Segment> {
        self.segment(SEG_LINKEDIT)
    }

    pub fn text(&self) -> Option<&Segment> {
        self.segment(SEG_TEXT)
    }

    /// The `LC_CODE_SIGNATURE` command, if any.
    pub fn code_signature(&self) -> Option<LinkeditData> {
        self.commands.iter().find_map(|c| match c {
            LoadCommand::CodeSignature(l) => Some(*l),
            _ => None,
        })
    }

    /// The signature region named by `LC_CODE_SIGNATURE`, if it lies inside the file.
    pub fn signature_region(&self) -> Option<&[u8]> {
        let sig = self.code_signature()?;
        let start = sig.dataoff as usize;
        let end = usize::try_from(sig.data_end()).ok()?;
        self.data.get(start..end)
    }

    /// The existing embedded signature, if the reserved region holds a well-formed one.
    pub fn embedded_signature(&self) -> Option<EmbeddedSignature<'_>> {
        EmbeddedSignature::parse(self.signature_region()?).ok()
    }

    /// Offset where section data begins: the smallest non-zero section file
    /// offset, else the smallest non-zero segment file offset, else the file end.
    pub fn first_section_offset(&self) -> u64 {
        section_data_start(&self.commands, self.data.len() as u64)
    }

    /// End of the load-command table.
    pub fn load_commands_end(&self) -> u64 {
        (self.header.size() + self.header.sizeofcmds as usize) as u64
    }

    /// Padding available between the load-command table and section data.
    pub fn load_commands_free_space(&self) -> u64 {
        self.first_section_offset()
            .saturating_sub(self.load_commands_end())
    }

    /// Installs a new load-command list.
    ///
    /// The table is encoded and checked against the space before section
    /// data first; on failure nothing is written. On success the header
    /// counters are updated and any bytes freed by a shrinking table are
    /// zeroed.
    pub fn replace_commands(&mut self, commands: Vec<LoadCommand>) -> Result<()> {
        let codec = self.codec();
        let align = self.header.pointer_size();
        let mut table = Vec::new();
        for command in &commands {
            let bytes = command.to_bytes(codec)?;
            if bytes.len() % align != 0 {
                return Err(Error::Format(format!(
                    "{} has unaligned size {}",
                    command.name(),
                    bytes.len()
                )));
            }
            table.extend(bytes);
        }

        let start = self.header.size();
        let file_len = self.data.len() as u64;
        let limit = section_data_start(&commands, file_len).min(file_len);
        let new_end = (start + table.len()) as u64;
        if new_end > limit {
            return Err(Error::Capacity(format!(
                "load commands need {} bytes, only {} available before section data at {limit:#x}",
                table.len(),
                limit.saturating_sub(start as u64)
            )));
        }
        let sizeofcmds = u32::try_from(table.len())
            .map_err(|_| Error::Format("load-command table too large".into()))?;

        let old_end = self.load_commands_end() as usize;
        let new_end = new_end as usize;

        let mut header = self.header.clone();
        header.ncmds = commands.len() as u32;
        header.sizeofcmds = sizeofcmds;

        self.data[start..new_end].copy_from_slice(&table);
        if old_end > new_end {
            self.data[new_end..old_end].fill(0);
        }
        header.write(&mut self.data)?;
        self.header = header;
        self.commands = commands;
        Ok(())
    }

    /// Mutable access to the raw image for the allocator and signer.
    pub(crate) fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Re-encodes the header and every load command over the current image.
    ///
    /// For an unmodified container this reproduces the parsed bytes exactly.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let codec = self.codec();
        let mut out = self.data.clone();
        self.header.write(&mut out)?;
        let mut offset = self.header.size();
        for command in &self.commands {
            let bytes = command.to_bytes(codec)?;
            out[offset..offset + bytes.len()].copy_from_slice(&bytes);
            offset += bytes.len();
        }
        Ok(out)
    }

    /// Writes the image to `path` atomically.
    ///
    /// The bytes go to a temporary file in the destination directory, which
    /// then replaces `path`. An existing file's permissions are carried over.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.to_bytes()?)?;
        tmp.as_file().sync_all()?;
        if let Ok(meta) = std::fs::metadata(path) {
            tmp.as_file().set_permissions(meta.permissions())?;
        }
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        debug!("wrote {} bytes to {}", self.data.len(), path.display());
        Ok(())
    }

    /// Summary of the slice for display.
    pub fn info(&self) -> MachOInfo {
        let sig = self.code_signature();
        MachOInfo {
            file_type: self.header.file_type_name(),
            arch: self.header.arch_name(),
            is_64: self.header.is_64(),
            big_endian: self.codec().endian() == scroll::Endian::Big,
            ncmds: self.header.ncmds,
            sizeofcmds: self.header.sizeofcmds,
            free_space: self.load_commands_free_space(),
            code_length: sig.map(|s| u64::from(s.dataoff)).unwrap_or(self.data.len() as u64),
            signature: sig.map(|s| (s.dataoff, s.datasize)),
            encrypted: self.is_encrypted(),
            dylibs: self.list_dylibs(),
        }
    }
}

fn section_data_start(commands: &[LoadCommand], file_len: u64) -> u64 {
    let segments = || commands.iter().filter_map(LoadCommand::as_segment);
    segments()
        .flat_map(|seg| seg.sections.iter())
        .map(|s| u64::from(s.offset))
        .filter(|&off| off != 0)
        .min()
        .or_else(|| segments().map(|seg| seg.fileoff).filter(|&off| off != 0).min())
        .unwrap_or(file_len)
}

/// Printable summary of a slice, as produced by [`MachOContainer::info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachOInfo {
    pub file_type: &'static str,
    pub arch: &'static str,
    pub is_64: bool,
    pub big_endian: bool,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub free_space: u64,
    pub code_length: u64,
    /// `(dataoff, datasize)` of `LC_CODE_SIGNATURE`.
    pub signature: Option<(u32, u32)>,
    pub encrypted: bool,
    pub dylibs: Vec<String>,
}

impl fmt::Display for MachOInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File Type:    {}", self.file_type)?;
        writeln!(
            f,
            "Arch:         {} ({}-bit, {})",
            self.arch,
            if self.is_64 { 64 } else { 32 },
            if self.big_endian { "big-endian" } else { "little-endian" }
        )?;
        writeln!(f, "Load Cmds:    {} ({} bytes)", self.ncmds, self.sizeofcmds)?;
        writeln!(f, "Free Space:   {}", self.free_space)?;
        writeln!(f, "Code Length:  {}", self.code_length)?;
        match self.signature {
            Some((off, size)) => writeln!(f, "Signature:    {off:#x} ({size} bytes)")?,
            None => writeln!(f, "Signature:    none")?,
        }
        writeln!(f, "Encrypted:    {}", if self.encrypted { "yes" } else { "no" })?;
        writeln!(f, "Dylibs:")?;
        for dylib in &self.dylibs {
            writeln!(f, "  {dylib}")?;
        }
        Ok(())
    }
}
