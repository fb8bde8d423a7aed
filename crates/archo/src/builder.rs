//! One-shot signing of a single Mach-O file.
//!
//! [`SignOptions`] collects credentials, dylib edits and output settings, then
//! runs the whole flow: load the signing asset, open the slice, apply edits,
//! reserve signature space, sign and write the result atomically.

use crate::crypto::asset::extract_entitlements_from_profile;
use crate::crypto::SigningAsset;
use crate::macho::{
    DylibEditor, DylibKind, MachOContainer, SignatureInputs, SignatureSpaceAllocator, SlotDigests,
};
use crate::{Error, Result};
use log::{info, warn};
use secrecy::SecretString;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Options for [`SignOptions::sign_file`].
///
/// Without any credentials the file is signed ad-hoc.
///
/// # Example
///
/// ```no_run
/// use archo::{DylibKind, SignOptions};
///
/// let output = SignOptions::new()
///     .pkcs12("identity.p12")
///     .password("secret")
///     .provisioning_profile("embedded.mobileprovision")
///     .bundle_id("com.example.app")
///     .inject("@executable_path/Frameworks/libHook.dylib", DylibKind::Weak)
///     .sign_file("Payload/App.app/App")?;
/// println!("wrote {}", output.display());
/// # Ok::<(), archo::Error>(())
/// ```
#[derive(Clone, Default)]
pub struct SignOptions {
    certificate: Option<PathBuf>,
    private_key: Option<PathBuf>,
    chain: Vec<PathBuf>,
    pkcs12: Option<PathBuf>,
    password: Option<SecretString>,
    provisioning_profile: Option<PathBuf>,
    entitlements: Option<PathBuf>,
    info_plist: Option<PathBuf>,
    code_resources: Option<PathBuf>,
    bundle_id: Option<String>,
    inject: Vec<(String, DylibKind)>,
    remove: BTreeSet<String>,
    force: bool,
    reserve: u64,
    output: Option<PathBuf>,
}

impl SignOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set certificate file path (PEM or DER format).
    ///
    /// Use together with `private_key()`, or use `pkcs12()` instead.
    pub fn certificate(mut self, path: impl AsRef<Path>) -> Self {
        self.certificate = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set PKCS#8 private key file path (PEM or DER format).
    pub fn private_key(mut self, path: impl AsRef<Path>) -> Self {
        self.private_key = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set PKCS#12 file path (.p12 format).
    /// Adds a PEM file of intermediate certificates to embed in the CMS
    /// signature after the leaf. May be given several times.
    pub fn chain(mut self, path: impl AsRef<Path>) -> Self {
        self.chain.push(path.as_ref().to_path_buf());
        self
    }

    pub fn pkcs12(mut self, path: impl AsRef<Path>) -> Self {
        self.pkcs12 = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set password for the PKCS#12 file.
    ///
    /// The password is stored securely and will be zeroized when dropped.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Set provisioning profile path (.mobileprovision format). Its
    /// entitlements are embedded unless `entitlements()` is also set, also
    /// when signing ad-hoc.
    pub fn provisioning_profile(mut self, path: impl AsRef<Path>) -> Self {
        self.provisioning_profile = Some(path.as_ref().to_path_buf());
        self
    }

    /// XML entitlements plist to embed.
    pub fn entitlements(mut self, path: impl AsRef<Path>) -> Self {
        self.entitlements = Some(path.as_ref().to_path_buf());
        self
    }

    /// Info.plist bound through special slot -1.
    pub fn info_plist(mut self, path: impl AsRef<Path>) -> Self {
        self.info_plist = Some(path.as_ref().to_path_buf());
        self
    }

    /// CodeResources bound through special slot -3.
    pub fn code_resources(mut self, path: impl AsRef<Path>) -> Self {
        self.code_resources = Some(path.as_ref().to_path_buf());
        self
    }

    /// Signing identifier. Defaults to the input file name.
    pub fn bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }

    /// Adds a dylib load command before signing.
    pub fn inject(mut self, path: impl Into<String>, kind: DylibKind) -> Self {
        self.inject.push((path.into(), kind));
        self
    }

    /// Removes a dylib dependency before signing.
    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.remove.insert(path.into());
        self
    }

    /// Replace an existing signature.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Reserve at least `bytes` for the signature.
    pub fn reserve(mut self, bytes: u64) -> Self {
        self.reserve = bytes;
        self
    }

    /// Write to `path` instead of replacing the input.
    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.output = Some(path.as_ref().to_path_buf());
        self
    }

    /// Validate the credential configuration.
    ///
    /// Returns an error if:
    /// - Both PKCS#12 and PEM credentials are specified
    /// - Only one of certificate/private_key is specified
    /// - A password is given without a PKCS#12 file
    /// - A certificate chain is given without a signing identity
    pub fn validate(&self) -> Result<()> {
        let has_p12 = self.pkcs12.is_some();
        let has_pem = self.certificate.is_some() || self.private_key.is_some();

        if has_p12 && has_pem {
            return Err(Error::Config(
                "cannot specify both PKCS#12 and PEM certificate/key".into(),
            ));
        }
        if has_pem && (self.certificate.is_none() || self.private_key.is_none()) {
            return Err(Error::MissingCredentials(
                "both certificate and private key must be specified".into(),
            ));
        }
        if !self.chain.is_empty() && !has_p12 && !has_pem {
            return Err(Error::MissingCredentials(
                "certificate chain given without a signing identity".into(),
            ));
        }
        if self.password.is_some() && !has_p12 {
            return Err(Error::Config("a password is only used with PKCS#12".into()));
        }
        if self.inject.iter().any(|(path, _)| path.is_empty()) {
            return Err(Error::Config("dylib path is empty".into()));
        }
        Ok(())
    }

    /// Loads the configured signing asset; `None` means ad-hoc.
    pub fn load_asset(&self) -> Result<Option<SigningAsset>> {
        self.validate()?;

        let mut asset = if let Some(p12) = &self.pkcs12 {
            let empty = SecretString::new(String::new());
            let password = self.password.as_ref().unwrap_or(&empty);
            SigningAsset::from_p12(&fs::read(p12)?, password)?
        } else if let (Some(cert), Some(key)) = (&self.certificate, &self.private_key) {
            SigningAsset::from_pem(&fs::read(cert)?, &fs::read(key)?)?
        } else {
            return Ok(None);
        };
        for path in &self.chain {
            asset = asset.with_chain_pem(&fs::read(path)?)?;
        }

        match &self.provisioning_profile {
            Some(profile) => Ok(Some(asset.with_provisioning_profile(profile)?)),
            None => Ok(Some(asset)),
        }
    }

    fn signature_inputs(&self, input: &Path, asset: Option<&SigningAsset>) -> Result<SignatureInputs> {
        let bundle_id = match &self.bundle_id {
            Some(id) => id.clone(),
            None => input
                .file_name()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .ok_or_else(|| Error::Config(format!("no bundle id for {}", input.display())))?,
        };

        let mut inputs = SignatureInputs::new(bundle_id).force(self.force);
        if let Some(path) = &self.entitlements {
            inputs = inputs.entitlements(fs::read(path)?);
        } else if let (None, Some(profile)) = (asset, &self.provisioning_profile) {
            // ad-hoc signatures still carry the profile's entitlements
            inputs = inputs.entitlements(extract_entitlements_from_profile(&fs::read(profile)?)?);
        }
        if let Some(path) = &self.info_plist {
            inputs = inputs.info_plist(SlotDigests::of(&fs::read(path)?));
        }
        if let Some(path) = &self.code_resources {
            inputs = inputs.code_resources(SlotDigests::of(&fs::read(path)?));
        }
        Ok(inputs)
    }

    /// Signs `input` and returns the path written.
    ///
    /// # Errors
    ///
    /// Any error of the individual steps; the output file is only replaced
    /// once every step has succeeded.
    pub fn sign_file(&self, input: impl AsRef<Path>) -> Result<PathBuf> {
        let input = input.as_ref();
        let asset = self.load_asset()?;
        let inputs = self.signature_inputs(input, asset.as_ref())?;
        let mut container = MachOContainer::open(input)?;

        let mut editor = DylibEditor::new(&mut container);
        for (path, kind) in &self.inject {
            editor.inject_dylib(path, *kind)?;
        }
        if !self.remove.is_empty() {
            let removed = editor.remove_dylibs(&self.remove)?;
            if removed == 0 {
                warn!("none of the dylibs to remove are linked");
            }
        }

        // entitlements are stored twice (XML and DER)
        let entitlements_len = inputs_entitlements_len(&inputs, asset.as_ref());
        let allocator = SignatureSpaceAllocator::new()
            .payload_hint(entitlements_len * 2)
            .reserve_at_least(self.reserve);
        let reserved = allocator.realloc(&mut container)?;

        match container.sign(asset.as_ref(), inputs.clone()) {
            Err(Error::Capacity(msg)) => {
                let retry = u64::from(reserved) * 2;
                warn!("{msg}; retrying with {retry} bytes reserved");
                allocator.reserve_at_least(retry).realloc(&mut container)?;
                container.sign(asset.as_ref(), inputs)?;
            }
            other => other?,
        }

        let output = self.output.clone().unwrap_or_else(|| input.to_path_buf());
        container.write_to(&output)?;
        info!("wrote {}", output.display());
        Ok(output)
    }
}

fn inputs_entitlements_len(inputs: &SignatureInputs, asset: Option<&SigningAsset>) -> u64 {
    inputs
        .entitlements_len()
        .or_else(|| asset.and_then(|a| a.entitlements.as_ref()).map(Vec::len))
        .unwrap_or(0) as u64
}
