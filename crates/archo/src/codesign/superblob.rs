//! SuperBlob assembly for Apple code signatures
//!
//! The embedded signature is a SuperBlob: a 12-byte header (magic, total
//! length, count), an index of `(slot, offset)` pairs, then the blobs
//! themselves. Every field is big-endian and every offset is relative to the
//! start of the SuperBlob.
//!
//! Slots written, in index order:
//!
//! | slot | blob |
//! |---|---|
//! | `0x0000` | SHA-1 CodeDirectory |
//! | `0x0002` | requirements |
//! | `0x0005` | XML entitlements |
//! | `0x0007` | DER entitlements |
//! | `0x1000` | SHA-256 CodeDirectory |
//! | `0x10000` | CMS blob wrapper |

use super::constants::*;
use super::requirements::empty_requirements;
use crate::{Error, Result};

/// Size of the SuperBlob header in bytes (magic + length + count)
pub const SUPERBLOB_HEADER_SIZE: usize = 12;

/// Size of each index entry in bytes (slot_type + offset)
pub const INDEX_ENTRY_SIZE: usize = 8;

/// Size of a generic blob header (magic + length)
pub const BLOB_HEADER_SIZE: usize = 8;

/// A blob entry for inclusion in a SuperBlob.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    /// See `CSSLOT_*` constants for standard slot types.
    pub slot_type: u32,
    /// The raw blob data, including its own magic and length header.
    pub data: Vec<u8>,
}

impl BlobEntry {
    pub fn new(slot_type: u32, data: Vec<u8>) -> Self {
        Self { slot_type, data }
    }
}

fn blob_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::Signing(format!("blob of {len} bytes exceeds 32 bits")))
}

/// Build a SuperBlob containing all signature components.
///
/// Entries are written in the order given; the index follows the same order.
///
/// # Example
///
/// ```
/// use archo::codesign::superblob::{build_superblob, BlobEntry};
/// use archo::codesign::constants::*;
///
/// let blob = build_superblob(vec![
///     BlobEntry::new(CSSLOT_CODEDIRECTORY, vec![0; 16]),
///     BlobEntry::new(CSSLOT_REQUIREMENTS, vec![0; 12]),
/// ])?;
/// assert_eq!(blob.len(), 12 + 2 * 8 + 16 + 12);
/// # Ok::<(), archo::Error>(())
/// ```
pub fn build_superblob(entries: Vec<BlobEntry>) -> Result<Vec<u8>> {
    let header_size = SUPERBLOB_HEADER_SIZE + entries.len() * INDEX_ENTRY_SIZE;
    let total_length = header_size + entries.iter().map(|e| e.data.len()).sum::<usize>();

    let mut buf = Vec::with_capacity(total_length);
    buf.extend(CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes());
    buf.extend(blob_len(total_length)?.to_be_bytes());
    buf.extend(blob_len(entries.len())?.to_be_bytes());

    let mut offset = header_size;
    for entry in &entries {
        buf.extend(entry.slot_type.to_be_bytes());
        buf.extend(blob_len(offset)?.to_be_bytes());
        offset += entry.data.len();
    }

    for entry in entries {
        buf.extend(entry.data);
    }

    Ok(buf)
}

/// Prefixes `payload` with a generic blob header.
pub fn wrap_blob(magic: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let total_len = blob_len(BLOB_HEADER_SIZE + payload.len())?;
    let mut buf = Vec::with_capacity(total_len as usize);
    buf.extend(magic.to_be_bytes());
    buf.extend(total_len.to_be_bytes());
    buf.extend(payload);
    Ok(buf)
}

/// Wraps XML plist entitlements.
pub fn build_entitlements_blob(plist_data: &[u8]) -> Result<Vec<u8>> {
    wrap_blob(CSMAGIC_EMBEDDED_ENTITLEMENTS, plist_data)
}

/// Wraps DER-encoded entitlements.
pub fn build_der_entitlements_blob(der_data: &[u8]) -> Result<Vec<u8>> {
    wrap_blob(CSMAGIC_EMBEDDED_DER_ENTITLEMENTS, der_data)
}

/// Wraps a DER-encoded CMS `SignedData`.
pub fn build_signature_blob(cms_data: &[u8]) -> Result<Vec<u8>> {
    wrap_blob(CSMAGIC_BLOBWRAPPER, cms_data)
}

/// Builder for constructing SuperBlobs in a structured way.
///
/// # Example
///
/// ```ignore
/// let superblob = SuperBlobBuilder::new()
///     .code_directory_sha1(cd_sha1)
///     .code_directory_sha256(cd_sha256)
///     .requirements(requirements)
///     .entitlements(entitlements_blob)
///     .cms_signature(signature_blob)
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct SuperBlobBuilder {
    /// SHA-1 CodeDirectory (slot 0x0000), the one the CMS signs
    code_directory_sha1: Option<Vec<u8>>,
    /// SHA-256 CodeDirectory (slot 0x1000)
    code_directory_sha256: Option<Vec<u8>>,
    requirements: Option<Vec<u8>>,
    entitlements: Option<Vec<u8>>,
    der_entitlements: Option<Vec<u8>>,
    cms_signature: Option<Vec<u8>>,
}

impl SuperBlobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code_directory_sha1(mut self, cd: Vec<u8>) -> Self {
        self.code_directory_sha1 = Some(cd);
        self
    }

    pub fn code_directory_sha256(mut self, cd: Vec<u8>) -> Self {
        self.code_directory_sha256 = Some(cd);
        self
    }

    /// Set the requirements blob. Defaults to the empty requirement set.
    pub fn requirements(mut self, req: Vec<u8>) -> Self {
        self.requirements = Some(req);
        self
    }

    pub fn entitlements(mut self, ent: Vec<u8>) -> Self {
        self.entitlements = Some(ent);
        self
    }

    pub fn der_entitlements(mut self, der_ent: Vec<u8>) -> Self {
        self.der_entitlements = Some(der_ent);
        self
    }

    /// Set the CMS signature blob. Left out for ad-hoc signatures.
    pub fn cms_signature(mut self, sig: Vec<u8>) -> Self {
        self.cms_signature = Some(sig);
        self
    }

    /// Build the SuperBlob with all configured components.
    ///
    /// Components are ordered by slot type:
    /// 1. CodeDirectory SHA-1 (0x0000)
    /// 2. Requirements (0x0002)
    /// 3. Entitlements (0x0005) - if present
    /// 4. DER Entitlements (0x0007) - if present
    /// 5. CodeDirectory SHA-256 (0x1000)
    /// 6. CMS Signature (0x10000) - if present
    pub fn build(self) -> Result<Vec<u8>> {
        build_superblob(self.entries())
    }

    fn entries(self) -> Vec<BlobEntry> {
        let slots = [
            (CSSLOT_CODEDIRECTORY, self.code_directory_sha1),
            (
                CSSLOT_REQUIREMENTS,
                Some(self.requirements.unwrap_or_else(empty_requirements)),
            ),
            (CSSLOT_ENTITLEMENTS, self.entitlements),
            (CSSLOT_DER_ENTITLEMENTS, self.der_entitlements),
            (CSSLOT_ALTERNATE_CODEDIRECTORIES, self.code_directory_sha256),
            (CSSLOT_SIGNATURESLOT, self.cms_signature),
        ];
        slots
            .into_iter()
            .filter_map(|(slot, data)| data.map(|data| BlobEntry::new(slot, data)))
            .collect()
    }
}
