//! Mach-O slice parsing, editing and signing.

pub mod allocator;
pub mod container;
pub mod dylib;
pub mod endian;
pub mod header;
pub mod load_command;
pub mod signer;

pub use allocator::SignatureSpaceAllocator;
pub use container::{MachOContainer, MachOInfo};
pub use dylib::{DylibEditor, DylibKind};
pub use endian::FieldCodec;
pub use header::Header;
pub use load_command::LoadCommand;
pub use signer::{BuildStage, CodeSignatureBuilder, SignatureInputs, SlotDigests};
