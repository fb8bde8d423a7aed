//! Apple code signing constants and magic numbers
//!
//! These constants define the binary format for Apple code signatures,
//! including SuperBlob structures, CodeDirectory formats, and hash types.

// =============================================================================
// SuperBlob Magic Numbers
// =============================================================================

/// SuperBlob containing all signature components (embedded signature)
pub const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade0cc0;

/// CodeDirectory blob magic
pub const CSMAGIC_CODEDIRECTORY: u32 = 0xfade0c02;

/// Requirements blob magic
pub const CSMAGIC_REQUIREMENTS: u32 = 0xfade0c01;

/// Single requirement blob magic
pub const CSMAGIC_REQUIREMENT: u32 = 0xfade0c00;

/// Embedded entitlements (XML plist format)
pub const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xfade7171;

/// Embedded DER entitlements (ASN.1 DER format)
pub const CSMAGIC_EMBEDDED_DER_ENTITLEMENTS: u32 = 0xfade7172;

/// CMS signature wrapper blob
pub const CSMAGIC_BLOBWRAPPER: u32 = 0xfade0b01;

// =============================================================================
// Slot Types (for SuperBlob index)
// =============================================================================

/// Main code directory slot (SHA-1)
pub const CSSLOT_CODEDIRECTORY: u32 = 0x0000;

/// Info.plist slot
pub const CSSLOT_INFOSLOT: u32 = 0x0001;

/// Code requirements slot
pub const CSSLOT_REQUIREMENTS: u32 = 0x0002;

/// Resource directory (CodeResources) slot
pub const CSSLOT_RESOURCEDIR: u32 = 0x0003;

/// Application-specific slot
pub const CSSLOT_APPLICATION: u32 = 0x0004;

/// Entitlements slot (XML format)
pub const CSSLOT_ENTITLEMENTS: u32 = 0x0005;

/// Rep-specific slot
pub const CSSLOT_REP_SPECIFIC: u32 = 0x0006;

/// DER entitlements slot
pub const CSSLOT_DER_ENTITLEMENTS: u32 = 0x0007;

/// Alternate code directories start (SHA-256, SHA-384, etc.)
pub const CSSLOT_ALTERNATE_CODEDIRECTORIES: u32 = 0x1000;

/// CMS signature slot
pub const CSSLOT_SIGNATURESLOT: u32 = 0x10000;

// =============================================================================
// Hash Types
// =============================================================================

/// SHA-1 hash (160-bit / 20 bytes)
pub const CS_HASHTYPE_SHA1: u8 = 1;

/// SHA-256 hash (256-bit / 32 bytes)
pub const CS_HASHTYPE_SHA256: u8 = 2;

// =============================================================================
// Hash Sizes
// =============================================================================

/// SHA-1 hash size in bytes
pub const CS_SHA1_LEN: usize = 20;

/// SHA-256 hash size in bytes
pub const CS_SHA256_LEN: usize = 32;

// =============================================================================
// Code Signature Flags
// =============================================================================

/// Ad-hoc signed (no identity)
pub const CS_ADHOC: u32 = 0x00000002;

// =============================================================================
// Exec Segment Flags
// =============================================================================

/// Executable segment is main binary
pub const CS_EXECSEG_MAIN_BINARY: u64 = 0x0001;

/// Allow unsigned executable memory
pub const CS_EXECSEG_ALLOW_UNSIGNED: u64 = 0x0010;

// =============================================================================
// CodeDirectory Version
// =============================================================================

/// Version with exec segment support (current/latest)
pub const CODEDIRECTORY_VERSION_EXECSEG: u32 = 0x20400;

/// Current/latest version we generate (exec segment support)
pub const CODEDIRECTORY_VERSION: u32 = CODEDIRECTORY_VERSION_EXECSEG;

// =============================================================================
// Page Size
// =============================================================================

/// Standard code signing page size (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Log2 of page size (for CodeDirectory header)
pub const PAGE_SIZE_LOG2: u8 = 12;

// =============================================================================
// Requirements Opcodes
// =============================================================================

/// Requirement expression: check identifier
pub const OP_IDENT: u32 = 2;

/// Requirement expression: logical AND
pub const OP_AND: u32 = 6;

/// Requirement expression: certificate field
pub const OP_CERT_FIELD: u32 = 11;

/// Requirement expression: certificate generic
pub const OP_CERT_GENERIC: u32 = 14;

/// Requirement expression: Apple generic anchor
pub const OP_APPLE_GENERIC_ANCHOR: u32 = 15;

// =============================================================================
// Requirements Types
// =============================================================================

/// Requirement type: designated requirement
pub const CSREQ_DESIGNATED: u32 = 0x0003;

// =============================================================================
// Match Operations (for requirements expressions)
// =============================================================================

/// Match: exists
pub const MATCH_EXISTS: u32 = 0;

/// Match: equal
pub const MATCH_EQUAL: u32 = 1;
