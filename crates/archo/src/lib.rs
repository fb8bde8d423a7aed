//! Mach-O slice editing and code signing.
//!
//! - [`MachOContainer`] parses one architecture slice and rewrites its
//!   load-command table.
//! - [`DylibEditor`] injects, removes and renames dylib dependencies.
//! - [`SignatureSpaceAllocator`] reserves room for the code signature at the
//!   end of `__LINKEDIT`.
//! - [`CodeSignatureBuilder`] hashes the code and embeds a SuperBlob, signed
//!   with a [`SigningAsset`] or ad-hoc.
//!
//! [`SignOptions`] chains all of the above for a file on disk.

pub mod builder;
pub mod codesign;
pub mod crypto;
pub mod error;
pub mod macho;

pub use builder::SignOptions;
pub use crypto::SigningAsset;
pub use error::Error;
pub use macho::{
    BuildStage, CodeSignatureBuilder, DylibEditor, DylibKind, MachOContainer, MachOInfo,
    SignatureInputs, SignatureSpaceAllocator, SlotDigests,
};

pub type Result<T> = std::result::Result<T, Error>;
