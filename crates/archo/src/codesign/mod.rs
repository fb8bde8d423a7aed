//! Code signing structures and constants for iOS/macOS binaries

pub mod code_directory;
pub mod constants;
pub mod der;
pub mod digest;
pub mod reader;
pub mod requirements;
pub mod superblob;

pub use code_directory::{CodeDirectoryBuilder, PageHashes};
pub use digest::DigestType;
pub use reader::{CodeDirectoryInfo, EmbeddedSignature};
pub use superblob::SuperBlobBuilder;
