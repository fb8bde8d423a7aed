//! CodeDirectory blob builder for Apple code signing
//!
//! The CodeDirectory is the core data structure of a code signature. It holds
//! one hash per 4 KiB page of code, followed by a fixed set of special slots
//! (Info.plist, requirements, resources, entitlements) that bind the other
//! signature blobs to the directory.
//!
//! A signature carries one directory per hash algorithm. Page hashes are
//! computed once per algorithm by [`PageHashes::compute`] and then assembled
//! into a directory by [`CodeDirectoryBuilder`].

use super::constants::*;
use super::digest::DigestType;
use crate::{Error, Result};

// Special slot layout, stored in reverse order ahead of the code slots:
// -1 Info.plist, -2 requirements, -3 CodeResources, -4 application (zero),
// -5 XML entitlements, -6 rep-specific (zero), -7 DER entitlements

/// CodeDirectory header size for version 0x20400 (with exec segment fields)
pub const CODEDIRECTORY_HEADER_SIZE: usize = 88;

/// Special slots present in every directory (-1 through -5).
const BASE_SPECIAL_SLOTS: usize = 5;

/// Special slots when DER entitlements are carried (-1 through -7).
const DER_SPECIAL_SLOTS: usize = 7;

/// Per-page hashes of `[0, code_limit)` for one algorithm.
///
/// Slot *i* is the hash of bytes `[i * 4096, min((i + 1) * 4096, code_limit))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHashes {
    digest: DigestType,
    code_limit: u32,
    hashes: Vec<Vec<u8>>,
}

impl PageHashes {
    /// Hashes `code` page by page. The final page may be short.
    ///
    /// Fails with [`Error::Format`] when the code exceeds the 32-bit
    /// `codeLimit` field.
    pub fn compute(code: &[u8], digest: DigestType) -> Result<Self> {
        let code_limit = u32::try_from(code.len()).map_err(|_| {
            Error::Format(format!("code region of {} bytes exceeds 32 bits", code.len()))
        })?;
        let hashes = code.chunks(PAGE_SIZE).map(|page| digest.digest(page)).collect();
        Ok(Self {
            digest,
            code_limit,
            hashes,
        })
    }

    pub fn digest(&self) -> DigestType {
        self.digest
    }

    pub fn code_limit(&self) -> u32 {
        self.code_limit
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.hashes.iter().map(Vec::as_slice)
    }
}

/// Builder for creating CodeDirectory blobs.
///
/// The CodeDirectory contains:
/// - Magic number and version
/// - Hash of the binary's code pages (4KB each)
/// - Special slot hashes (Info.plist, requirements, resources, entitlements)
/// - Bundle identifier and team ID
/// - Exec segment information
///
/// Every special slot hash must have the width of the directory's digest.
/// Slots without a hash are written as zeros, never omitted.
///
/// # Example
///
/// ```
/// use archo::codesign::{CodeDirectoryBuilder, DigestType, PageHashes};
/// use archo::codesign::constants::CS_EXECSEG_MAIN_BINARY;
///
/// let pages = PageHashes::compute(&[0u8; 8192], DigestType::Sha256)?;
/// let cd = CodeDirectoryBuilder::new("com.example.app", pages)
///     .team_id("TEAMID1234")
///     .exec_seg_limit(65536)
///     .exec_seg_flags(CS_EXECSEG_MAIN_BINARY)
///     .build()?;
/// assert_eq!(&cd[..4], &[0xfa, 0xde, 0x0c, 0x02]);
/// # Ok::<(), archo::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct CodeDirectoryBuilder {
    identifier: String,
    team_id: Option<String>,
    pages: PageHashes,
    /// Indexed by slot number minus one.
    special: [Option<Vec<u8>>; DER_SPECIAL_SLOTS],
    exec_seg_base: u64,
    exec_seg_limit: u64,
    exec_seg_flags: u64,
    flags: u32,
}

impl CodeDirectoryBuilder {
    /// Create a builder for a directory over `pages`.
    ///
    /// # Arguments
    ///
    /// * `identifier` - Bundle identifier (e.g., "com.example.app")
    /// * `pages` - Page hashes; their digest selects the directory's hash type
    pub fn new(identifier: impl Into<String>, pages: PageHashes) -> Self {
        Self {
            identifier: identifier.into(),
            team_id: None,
            pages,
            special: Default::default(),
            exec_seg_base: 0,
            exec_seg_limit: 0,
            exec_seg_flags: 0,
            flags: 0,
        }
    }

    /// Set the team identifier (the certificate's OU). Omitted when ad-hoc.
    pub fn team_id(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    /// Set the Info.plist hash (special slot -1).
    pub fn info_hash(self, hash: Vec<u8>) -> Self {
        self.special_slot(CSSLOT_INFOSLOT, hash)
    }

    /// Set the requirements blob hash (special slot -2).
    pub fn requirements_hash(self, hash: Vec<u8>) -> Self {
        self.special_slot(CSSLOT_REQUIREMENTS, hash)
    }

    /// Set the CodeResources hash (special slot -3).
    pub fn resources_hash(self, hash: Vec<u8>) -> Self {
        self.special_slot(CSSLOT_RESOURCEDIR, hash)
    }

    /// Set the XML entitlements blob hash (special slot -5).
    pub fn entitlements_hash(self, hash: Vec<u8>) -> Self {
        self.special_slot(CSSLOT_ENTITLEMENTS, hash)
    }

    /// Set the DER entitlements blob hash (special slot -7).
    ///
    /// Only main executables carry slots -6 and -7; the hash is ignored
    /// unless `CS_EXECSEG_MAIN_BINARY` is set.
    pub fn der_entitlements_hash(self, hash: Vec<u8>) -> Self {
        self.special_slot(CSSLOT_DER_ENTITLEMENTS, hash)
    }

    fn special_slot(mut self, slot: u32, hash: Vec<u8>) -> Self {
        self.special[slot as usize - 1] = Some(hash);
        self
    }

    /// File offset of the executable segment (`__TEXT`).
    pub fn exec_seg_base(mut self, base: u64) -> Self {
        self.exec_seg_base = base;
        self
    }

    /// File size of the executable segment.
    pub fn exec_seg_limit(mut self, limit: u64) -> Self {
        self.exec_seg_limit = limit;
        self
    }

    /// Set the raw executable segment flags.
    ///
    /// Common flag combinations:
    /// - `CS_EXECSEG_MAIN_BINARY` for main executables
    /// - `CS_EXECSEG_MAIN_BINARY | CS_EXECSEG_ALLOW_UNSIGNED` for executables with get-task-allow
    pub fn exec_seg_flags(mut self, flags: u64) -> Self {
        self.exec_seg_flags = flags;
        self
    }

    /// Set the code signature flags, e.g. `CS_ADHOC`.
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    fn is_main_executable(&self) -> bool {
        self.exec_seg_flags & CS_EXECSEG_MAIN_BINARY != 0
    }

    /// Number of special slots written: 7 for a main executable carrying DER
    /// entitlements, 5 otherwise.
    pub fn special_slot_count(&self) -> usize {
        let der = self.special[CSSLOT_DER_ENTITLEMENTS as usize - 1].is_some();
        if der && self.is_main_executable() {
            DER_SPECIAL_SLOTS
        } else {
            BASE_SPECIAL_SLOTS
        }
    }

    /// Serializes the directory.
    ///
    /// Fails with [`Error::Signing`] if a special slot hash has the wrong
    /// width for the digest, or the blob would exceed 32-bit offsets.
    pub fn build(&self) -> Result<Vec<u8>> {
        let digest = self.pages.digest();
        let hash_size = digest.size();
        let n_special = self.special_slot_count();
        let n_code = self.pages.len();

        for (index, hash) in self.special.iter().enumerate() {
            if let Some(hash) = hash {
                if hash.len() != hash_size {
                    return Err(Error::Signing(format!(
                        "special slot -{} holds {} bytes, {digest:?} needs {hash_size}",
                        index + 1,
                        hash.len()
                    )));
                }
            }
        }

        let ident_offset = CODEDIRECTORY_HEADER_SIZE;
        let ident_len = self.identifier.len() + 1;
        let team_len = self.team_id.as_ref().map_or(0, |t| t.len() + 1);
        let team_offset = if self.team_id.is_some() {
            ident_offset + ident_len
        } else {
            0
        };
        let hash_offset = ident_offset + ident_len + team_len + n_special * hash_size;
        let total_len = hash_offset + n_code * hash_size;

        let to_u32 = |value: usize| {
            u32::try_from(value)
                .map_err(|_| Error::Signing(format!("code directory too large ({value} bytes)")))
        };

        let mut buf = Vec::with_capacity(total_len);

        // Header (all fields are big-endian)
        buf.extend(CSMAGIC_CODEDIRECTORY.to_be_bytes());
        buf.extend(to_u32(total_len)?.to_be_bytes());
        buf.extend(CODEDIRECTORY_VERSION.to_be_bytes());
        buf.extend(self.flags.to_be_bytes());
        buf.extend(to_u32(hash_offset)?.to_be_bytes());
        buf.extend(to_u32(ident_offset)?.to_be_bytes());
        buf.extend(to_u32(n_special)?.to_be_bytes());
        buf.extend(to_u32(n_code)?.to_be_bytes());
        buf.extend(self.pages.code_limit().to_be_bytes());
        buf.push(hash_size as u8);
        buf.push(digest.hash_type());
        buf.push(0); // spare1
        buf.push(PAGE_SIZE_LOG2);
        buf.extend(0u32.to_be_bytes()); // spare2
        buf.extend(0u32.to_be_bytes()); // scatterOffset
        buf.extend(to_u32(team_offset)?.to_be_bytes());
        buf.extend(0u32.to_be_bytes()); // spare3
        buf.extend(0u64.to_be_bytes()); // codeLimit64, codeLimit suffices
        buf.extend(self.exec_seg_base.to_be_bytes());
        buf.extend(self.exec_seg_limit.to_be_bytes());
        buf.extend(self.exec_seg_flags.to_be_bytes());

        buf.extend(self.identifier.as_bytes());
        buf.push(0);
        if let Some(team) = &self.team_id {
            buf.extend(team.as_bytes());
            buf.push(0);
        }

        // -n .. -1
        let empty = vec![0u8; hash_size];
        for slot in (1..=n_special).rev() {
            buf.extend(self.special[slot - 1].as_deref().unwrap_or(&empty));
        }
        for hash in self.pages.iter() {
            buf.extend(hash);
        }

        debug_assert_eq!(buf.len(), total_len);
        Ok(buf)
    }
}
