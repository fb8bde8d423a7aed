//! Read-only view of an embedded signature.
//!
//! Used to detect an existing signature before re-signing and to inspect
//! what was written.

use super::code_directory::CODEDIRECTORY_HEADER_SIZE;
use super::constants::*;
use super::digest::DigestType;
use super::superblob::{BLOB_HEADER_SIZE, INDEX_ENTRY_SIZE, SUPERBLOB_HEADER_SIZE};
use crate::{Error, Result};
use scroll::{Pread, BE};

/// One indexed blob of a SuperBlob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRef<'a> {
    pub slot: u32,
    pub magic: u32,
    /// Entire blob including its 8-byte header.
    pub data: &'a [u8],
}

impl<'a> BlobRef<'a> {
    /// Blob contents after the header.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[BLOB_HEADER_SIZE..]
    }
}

/// A parsed embedded-signature SuperBlob.
#[derive(Debug, Clone)]
pub struct EmbeddedSignature<'a> {
    data: &'a [u8],
    blobs: Vec<BlobRef<'a>>,
}

impl<'a> EmbeddedSignature<'a> {
    /// Parses the SuperBlob at the start of `data`. Trailing bytes past the
    /// SuperBlob length (reserved padding) are ignored.
    ///
    /// Fails with [`Error::Format`] on a wrong magic or any index entry or
    /// blob that points outside the SuperBlob.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let magic: u32 = data.pread_with(0, BE)?;
        if magic != CSMAGIC_EMBEDDED_SIGNATURE {
            return Err(Error::Format(format!("not an embedded signature: magic {magic:#010x}")));
        }
        let length = data.pread_with::<u32>(4, BE)? as usize;
        let count = data.pread_with::<u32>(8, BE)? as usize;
        if length > data.len() || length < SUPERBLOB_HEADER_SIZE {
            return Err(Error::Format(format!(
                "superblob length {length} outside region of {} bytes",
                data.len()
            )));
        }
        let data = &data[..length];

        let index_end = count
            .checked_mul(INDEX_ENTRY_SIZE)
            .and_then(|n| n.checked_add(SUPERBLOB_HEADER_SIZE))
            .filter(|&end| end <= length)
            .ok_or_else(|| Error::Format(format!("superblob index of {count} entries overruns")))?;

        let mut blobs = Vec::with_capacity(count);
        for entry in (SUPERBLOB_HEADER_SIZE..index_end).step_by(INDEX_ENTRY_SIZE) {
            let slot: u32 = data.pread_with(entry, BE)?;
            let offset = data.pread_with::<u32>(entry + 4, BE)? as usize;
            let magic: u32 = data.pread_with(offset, BE)?;
            let blob_len = data.pread_with::<u32>(offset + 4, BE)? as usize;
            let blob = offset
                .checked_add(blob_len)
                .filter(|_| blob_len >= BLOB_HEADER_SIZE)
                .and_then(|end| data.get(offset..end))
                .ok_or_else(|| {
                    Error::Format(format!("blob for slot {slot:#x} at {offset:#x} overruns"))
                })?;
            blobs.push(BlobRef {
                slot,
                magic,
                data: blob,
            });
        }

        Ok(Self { data, blobs })
    }

    /// Total SuperBlob length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn blobs(&self) -> &[BlobRef<'a>] {
        &self.blobs
    }

    pub fn blob(&self, slot: u32) -> Option<&BlobRef<'a>> {
        self.blobs.iter().find(|b| b.slot == slot)
    }

    /// The CodeDirectory in `slot` (`CSSLOT_CODEDIRECTORY` or an alternate slot).
    pub fn code_directory(&self, slot: u32) -> Result<Option<CodeDirectoryInfo<'a>>> {
        match self.blob(slot) {
            Some(blob) => CodeDirectoryInfo::parse(blob.data).map(Some),
            None => Ok(None),
        }
    }

    /// The CMS `SignedData` bytes, absent for ad-hoc signatures.
    pub fn signature_data(&self) -> Option<&'a [u8]> {
        self.blob(CSSLOT_SIGNATURESLOT).map(|b| b.payload())
    }
}

/// Decoded CodeDirectory header with access to its slots.
#[derive(Debug, Clone)]
pub struct CodeDirectoryInfo<'a> {
    data: &'a [u8],
    pub version: u32,
    pub flags: u32,
    pub hash_offset: u32,
    pub ident_offset: u32,
    pub n_special: u32,
    pub n_code: u32,
    pub code_limit: u32,
    pub hash_size: u8,
    pub hash_type: u8,
    pub page_size_log2: u8,
    pub team_offset: u32,
    pub exec_seg_base: u64,
    pub exec_seg_limit: u64,
    pub exec_seg_flags: u64,
}

impl<'a> CodeDirectoryInfo<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let magic: u32 = data.pread_with(0, BE)?;
        if magic != CSMAGIC_CODEDIRECTORY {
            return Err(Error::Format(format!("not a code directory: magic {magic:#010x}")));
        }
        let length = data.pread_with::<u32>(4, BE)? as usize;
        let data = data
            .get(..length)
            .ok_or_else(|| Error::Format("code directory overruns its blob".into()))?;
        if length < CODEDIRECTORY_HEADER_SIZE {
            return Err(Error::Format(format!("code directory of {length} bytes is truncated")));
        }

        let info = Self {
            data,
            version: data.pread_with(8, BE)?,
            flags: data.pread_with(12, BE)?,
            hash_offset: data.pread_with(16, BE)?,
            ident_offset: data.pread_with(20, BE)?,
            n_special: data.pread_with(24, BE)?,
            n_code: data.pread_with(28, BE)?,
            code_limit: data.pread_with(32, BE)?,
            hash_size: data[36],
            hash_type: data[37],
            page_size_log2: data[39],
            team_offset: data.pread_with(48, BE)?,
            exec_seg_base: data.pread_with(64, BE)?,
            exec_seg_limit: data.pread_with(72, BE)?,
            exec_seg_flags: data.pread_with(80, BE)?,
        };

        let hash_size = u64::from(info.hash_size);
        let special_start = u64::from(info.hash_offset)
            .checked_sub(u64::from(info.n_special) * hash_size)
            .ok_or_else(|| Error::Format("special slots precede the code directory".into()))?;
        let code_end = u64::from(info.hash_offset) + u64::from(info.n_code) * hash_size;
        if special_start < CODEDIRECTORY_HEADER_SIZE as u64 || code_end > length as u64 {
            return Err(Error::Format("code directory slots overrun".into()));
        }
        Ok(info)
    }

    pub fn digest(&self) -> Option<DigestType> {
        DigestType::from_hash_type(self.hash_type)
    }

    pub fn identifier(&self) -> Option<&'a str> {
        c_string(self.data, self.ident_offset)
    }

    pub fn team_id(&self) -> Option<&'a str> {
        match self.team_offset {
            0 => None,
            offset => c_string(self.data, offset),
        }
    }

    /// Hash in special slot `-index` (1-based).
    pub fn special_slot(&self, index: u32) -> Option<&'a [u8]> {
        if index == 0 || index > self.n_special {
            return None;
        }
        let size = self.hash_size as usize;
        let end = self.hash_offset as usize - (index as usize - 1) * size;
        self.data.get(end - size..end)
    }

    /// Hash of code page `index`.
    pub fn code_slot(&self, index: u32) -> Option<&'a [u8]> {
        if index >= self.n_code {
            return None;
        }
        let size = self.hash_size as usize;
        let start = self.hash_offset as usize + index as usize * size;
        self.data.get(start..start + size)
    }

    /// Raw directory bytes, the input of its cdhash.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// The directory's cdhash: its digest under its own hash type, truncated
    /// to 20 bytes.
    pub fn cdhash(&self) -> Option<[u8; 20]> {
        let full = self.digest()?.digest(self.data);
        full.get(..20)?.try_into().ok()
    }
}

fn c_string(data: &[u8], offset: u32) -> Option<&str> {
    let tail = data.get(offset as usize..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&tail[..end]).ok()
}
