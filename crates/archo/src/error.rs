//! Error types for archo operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure case
//! when parsing, editing and signing a Mach-O slice.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use thiserror::Error;

/// Error type for archo operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// Match on variants to handle specific failure cases.
///
/// # Examples
///
/// ```no_run
/// use archo::{Error, MachOContainer};
///
/// let mut container = MachOContainer::open("Payload/App.app/App")?;
/// match container.change_dylib_path("/usr/lib/libA.dylib", "/usr/lib/libB.dylib") {
///     Ok(()) => println!("renamed"),
///     Err(Error::NotFound(path)) => eprintln!("no such dependency: {path}"),
///     Err(Error::Capacity(msg)) => eprintln!("does not fit: {msg}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// # Ok::<(), archo::Error>(())
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Occurs when reading the input slice or persisting the edited output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed, truncated or unrecognized Mach-O header or load-command table.
    ///
    /// Always fatal to the current operation; no partial result is produced.
    #[error("Invalid Mach-O: {0}")]
    Format(String),

    /// Not enough reserved space for a signature or a new load command.
    ///
    /// Recoverable: reserve a larger signature region or rebuild the binary
    /// with more header padding, then retry.
    #[error("Insufficient space: {0}")]
    Capacity(String),

    /// A dylib path was not present in the load-command table.
    #[error("Dylib not found: {0}")]
    NotFound(String),

    /// The signing asset failed while producing the CMS signature.
    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    /// The binary already carries a signature and replacement was not forced.
    #[error("Binary is already signed (use force to replace the signature)")]
    AlreadySigned,

    /// Code signature assembly failed.
    ///
    /// Covers build steps invoked out of order and missing signature inputs.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Invalid or malformed certificate or private key.
    #[error("Invalid certificate: {0}")]
    Certificate(String),

    /// Required credentials not configured.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Invalid configuration.
    ///
    /// A configuration value is invalid or conflicting options were specified.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid or malformed provisioning profile.
    #[error("Invalid provisioning profile: {0}")]
    ProvisioningProfile(String),

    /// Property list parsing failed.
    ///
    /// Failed to parse entitlements or the CDHash attribute plist.
    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Self {
        Error::Format(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_error_maps_to_format() {
        use scroll::Pread;

        let bytes = [0u8; 2];
        let read: std::result::Result<u32, scroll::Error> = bytes[..].pread_with(0, scroll::LE);
        let err = Error::from(read.unwrap_err());
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::NotFound("/usr/lib/libA.dylib".into()).to_string(),
            "Dylib not found: /usr/lib/libA.dylib"
        );
        assert!(Error::AlreadySigned.to_string().contains("already signed"));
    }
}
