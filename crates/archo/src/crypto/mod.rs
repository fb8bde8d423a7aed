//! Signing identities and CMS construction.

pub mod asset;
pub mod cms;

pub use asset::SigningAsset;
