//! Mach-O signing implementation
//!
//! [`CodeSignatureBuilder`] turns a slice with a reserved signature region
//! into a signed slice. It hashes `[0, dataoff)` page by page, assembles a
//! SHA-1 and a SHA-256 CodeDirectory over the same pages, signs the SHA-1
//! directory with CMS (unless ad-hoc), wraps everything in a SuperBlob and
//! writes it into the region reserved by
//! [`SignatureSpaceAllocator`](super::SignatureSpaceAllocator).
//!
//! The build runs in stages that can be driven one at a time:
//!
//! ```text
//! Empty -> HashesComputed -> DirectoriesAssembled -> SignatureAttached -> Embedded
//! ```

use super::container::MachOContainer;
use crate::codesign::code_directory::{CodeDirectoryBuilder, PageHashes};
use crate::codesign::constants::{CS_ADHOC, CS_EXECSEG_ALLOW_UNSIGNED, CS_EXECSEG_MAIN_BINARY};
use crate::codesign::der::plist_to_der;
use crate::codesign::digest::{sha1, sha256, DigestType};
use crate::codesign::requirements::{designated_requirement, empty_requirements};
use crate::codesign::superblob::{
    build_der_entitlements_blob, build_entitlements_blob, build_signature_blob, SuperBlobBuilder,
};
use crate::crypto::{cms, SigningAsset};
use crate::{Error, Result};
use log::{debug, info, warn};

/// SHA-1 and SHA-256 digests of a file bound through a special slot
/// (Info.plist or CodeResources).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDigests {
    pub sha1: [u8; 20],
    pub sha256: [u8; 32],
}

impl SlotDigests {
    /// Digests of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self {
            sha1: sha1(data),
            sha256: sha256(data),
        }
    }

    fn for_digest(&self, digest: DigestType) -> Vec<u8> {
        match digest {
            DigestType::Sha1 => self.sha1.to_vec(),
            DigestType::Sha256 => self.sha256.to_vec(),
        }
    }
}

/// Everything a signature binds besides the code itself.
#[derive(Debug, Clone, Default)]
pub struct SignatureInputs {
    bundle_id: String,
    info_plist: Option<SlotDigests>,
    code_resources: Option<SlotDigests>,
    entitlements: Option<Vec<u8>>,
    requirements: Option<Vec<u8>>,
    force: bool,
}

impl SignatureInputs {
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            ..Self::default()
        }
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    /// Digests of the bundle's Info.plist (special slot -1).
    pub fn info_plist(mut self, digests: SlotDigests) -> Self {
        self.info_plist = Some(digests);
        self
    }

    /// Digests of `_CodeSignature/CodeResources` (special slot -3).
    pub fn code_resources(mut self, digests: SlotDigests) -> Self {
        self.code_resources = Some(digests);
        self
    }

    /// XML entitlements plist. Overrides the signing asset's entitlements.
    pub fn entitlements(mut self, xml: Vec<u8>) -> Self {
        self.entitlements = Some(xml);
        self
    }

    /// Length of the explicit entitlements plist, if any.
    pub fn entitlements_len(&self) -> Option<usize> {
        self.entitlements.as_ref().map(Vec::len)
    }

    /// Complete requirements blob (magic `0xfade0c01`), used verbatim.
    pub fn requirements(mut self, blob: Vec<u8>) -> Self {
        self.requirements = Some(blob);
        self
    }

    /// Replace an existing signature instead of failing with
    /// [`Error::AlreadySigned`].
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Progress of a [`CodeSignatureBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    Empty,
    HashesComputed,
    DirectoriesAssembled,
    SignatureAttached,
    Embedded,
}

#[derive(Debug)]
struct Directories {
    sha1: Vec<u8>,
    sha256: Vec<u8>,
    requirements: Vec<u8>,
    entitlements: Option<Vec<u8>>,
    der_entitlements: Option<Vec<u8>>,
}

/// Builds and embeds the code signature of one slice.
///
/// # Example
///
/// ```no_run
/// use archo::{CodeSignatureBuilder, MachOContainer, SignatureInputs, SignatureSpaceAllocator};
///
/// let mut container = MachOContainer::open("App")?;
/// SignatureSpaceAllocator::new().realloc(&mut container)?;
///
/// let inputs = SignatureInputs::new("com.example.app").force(true);
/// CodeSignatureBuilder::new(&mut container, None, inputs).sign()?;
/// container.write_to("App.signed")?;
/// # Ok::<(), archo::Error>(())
/// ```
pub struct CodeSignatureBuilder<'a> {
    container: &'a mut MachOContainer,
    asset: Option<&'a SigningAsset>,
    inputs: SignatureInputs,
    stage: BuildStage,
    code_limit: u32,
    capacity: u32,
    pages: Vec<PageHashes>,
    directories: Option<Directories>,
    superblob: Option<Vec<u8>>,
}

impl<'a> CodeSignatureBuilder<'a> {
    /// `asset` of `None` produces an ad-hoc signature.
    pub fn new(
        container: &'a mut MachOContainer,
        asset: Option<&'a SigningAsset>,
        inputs: SignatureInputs,
    ) -> Self {
        Self {
            container,
            asset,
            inputs,
            stage: BuildStage::Empty,
            code_limit: 0,
            capacity: 0,
            pages: Vec::new(),
            directories: None,
            superblob: None,
        }
    }

    pub fn stage(&self) -> BuildStage {
        self.stage
    }

    /// Bytes covered by the code hashes, known once hashes are computed.
    pub fn code_limit(&self) -> u32 {
        self.code_limit
    }

    fn expect_stage(&self, expected: BuildStage, step: &str) -> Result<()> {
        if self.stage != expected {
            return Err(Error::Signing(format!(
                "{step} requires stage {expected:?}, builder is at {:?}",
                self.stage
            )));
        }
        Ok(())
    }

    /// Checks for an existing signature and hashes every page before the
    /// reserved signature region.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadySigned`] if a signature is present and `force` is off
    /// - [`Error::Capacity`] if no signature region has been reserved
    pub fn compute_hashes(&mut self) -> Result<()> {
        self.expect_stage(BuildStage::Empty, "compute_hashes")?;

        if !self.inputs.force && self.container.embedded_signature().is_some() {
            return Err(Error::AlreadySigned);
        }
        if self.container.is_encrypted() {
            warn!("slice is encrypted, its signature will not verify until decrypted");
        }

        let region = self.container.code_signature().ok_or_else(|| {
            Error::Capacity("no LC_CODE_SIGNATURE; reserve signature space first".into())
        })?;
        if region.data_end() > self.container.len() as u64 {
            return Err(Error::Capacity(format!(
                "signature region {:#x}+{:#x} lies outside the file",
                region.dataoff, region.datasize
            )));
        }

        let code = &self.container.as_bytes()[..region.dataoff as usize];
        self.pages = vec![
            PageHashes::compute(code, DigestType::Sha1)?,
            PageHashes::compute(code, DigestType::Sha256)?,
        ];
        self.code_limit = region.dataoff;
        self.capacity = region.datasize;
        self.stage = BuildStage::HashesComputed;

        debug!(
            "hashed {} bytes in {} pages, {} bytes reserved for the signature",
            self.code_limit,
            self.pages[0].len(),
            self.capacity
        );
        Ok(())
    }

    /// Builds the requirements and entitlements blobs and one CodeDirectory
    /// per hash algorithm.
    pub fn assemble_directories(&mut self) -> Result<()> {
        self.expect_stage(BuildStage::HashesComputed, "assemble_directories")?;

        let identifier = self.inputs.bundle_id.clone();
        if identifier.is_empty() {
            return Err(Error::Signing("bundle identifier is empty".into()));
        }

        let entitlements = self
            .inputs
            .entitlements
            .clone()
            .or_else(|| self.asset.and_then(|a| a.entitlements.clone()));
        let is_execute = self.container.is_execute();

        let requirements = match (&self.inputs.requirements, self.asset) {
            (Some(blob), _) => blob.clone(),
            (None, Some(asset)) => match asset.common_name() {
                Some(cn) => designated_requirement(&identifier, &cn),
                None => empty_requirements(),
            },
            (None, None) => empty_requirements(),
        };

        let entitlements_blob = entitlements
            .as_deref()
            .map(build_entitlements_blob)
            .transpose()?;
        let der_entitlements = match (&entitlements, is_execute) {
            (Some(xml), true) => match plist_to_der(xml) {
                Ok(der) => Some(build_der_entitlements_blob(&der)?),
                Err(e) => {
                    warn!("omitting DER entitlements: {e}");
                    None
                }
            },
            _ => None,
        };

        let mut exec_seg_flags = 0;
        if is_execute {
            exec_seg_flags |= CS_EXECSEG_MAIN_BINARY;
            if entitlements.as_deref().is_some_and(get_task_allow) {
                exec_seg_flags |= CS_EXECSEG_ALLOW_UNSIGNED;
            }
        }
        let (exec_seg_base, exec_seg_limit) = self
            .container
            .text()
            .map_or((0, 0), |text| (text.fileoff, text.filesize));
        let flags = if self.asset.is_some() { 0 } else { CS_ADHOC };
        let team_id = self.asset.and_then(|a| a.team_id.clone());

        let mut built = Vec::with_capacity(self.pages.len());
        for pages in &self.pages {
            let digest = pages.digest();
            let mut cd = CodeDirectoryBuilder::new(identifier.as_str(), pages.clone())
                .flags(flags)
                .exec_seg_base(exec_seg_base)
                .exec_seg_limit(exec_seg_limit)
                .exec_seg_flags(exec_seg_flags)
                .requirements_hash(digest.digest(&requirements));
            if let Some(team) = &team_id {
                cd = cd.team_id(team.as_str());
            }
            if let Some(info) = &self.inputs.info_plist {
                cd = cd.info_hash(info.for_digest(digest));
            }
            if let Some(resources) = &self.inputs.code_resources {
                cd = cd.resources_hash(resources.for_digest(digest));
            }
            if let Some(blob) = &entitlements_blob {
                cd = cd.entitlements_hash(digest.digest(blob));
            }
            if let Some(blob) = &der_entitlements {
                cd = cd.der_entitlements_hash(digest.digest(blob));
            }
            built.push(cd.build()?);
        }

        let mut built = built.into_iter();
        let (Some(sha1), Some(sha256)) = (built.next(), built.next()) else {
            return Err(Error::Signing("missing page hashes".into()));
        };
        debug!(
            "code directories: sha1 {} bytes, sha256 {} bytes",
            sha1.len(),
            sha256.len()
        );

        self.directories = Some(Directories {
            sha1,
            sha256,
            requirements,
            entitlements: entitlements_blob,
            der_entitlements,
        });
        self.stage = BuildStage::DirectoriesAssembled;
        Ok(())
    }

    /// Signs the SHA-1 directory (skipped for ad-hoc) and assembles the SuperBlob.
    ///
    /// # Errors
    ///
    /// - [`Error::Crypto`] if the CMS signature cannot be produced
    /// - [`Error::Capacity`] if the SuperBlob exceeds the reserved region;
    ///   reserve more with
    ///   [`SignatureSpaceAllocator::reserve_at_least`](super::SignatureSpaceAllocator::reserve_at_least)
    ///   and start over
    pub fn attach_signature(&mut self) -> Result<()> {
        self.expect_stage(BuildStage::DirectoriesAssembled, "attach_signature")?;
        let dirs = self
            .directories
            .take()
            .ok_or_else(|| Error::Signing("code directories missing".into()))?;

        let cms_blob = match self.asset {
            Some(asset) => {
                let cdhash_sha1 = sha1(&dirs.sha1);
                let cdhash_sha256 = sha256(&dirs.sha256);
                let cms = cms::sign_with_apple_attrs(
                    &dirs.sha1,
                    &asset.signing_key,
                    &asset.certificate,
                    &asset.chain,
                    &cdhash_sha1,
                    &cdhash_sha256,
                )?;
                info!(
                    "signed {} with {}",
                    self.inputs.bundle_id,
                    asset.common_name().unwrap_or_else(|| "<unnamed certificate>".into())
                );
                Some(build_signature_blob(&cms)?)
            }
            None => {
                info!("ad-hoc signing {}", self.inputs.bundle_id);
                None
            }
        };

        let mut superblob = SuperBlobBuilder::new()
            .code_directory_sha1(dirs.sha1)
            .requirements(dirs.requirements)
            .code_directory_sha256(dirs.sha256);
        if let Some(blob) = dirs.entitlements {
            superblob = superblob.entitlements(blob);
        }
        if let Some(blob) = dirs.der_entitlements {
            superblob = superblob.der_entitlements(blob);
        }
        if let Some(blob) = cms_blob {
            superblob = superblob.cms_signature(blob);
        }
        let superblob = superblob.build()?;

        if superblob.len() > self.capacity as usize {
            return Err(Error::Capacity(format!(
                "signature needs {} bytes, {} reserved",
                superblob.len(),
                self.capacity
            )));
        }

        info!(
            "signature is {} of {} reserved bytes",
            superblob.len(),
            self.capacity
        );
        self.superblob = Some(superblob);
        self.stage = BuildStage::SignatureAttached;
        Ok(())
    }

    /// Runs every remaining stage up to the finished SuperBlob and returns it.
    pub fn build_code_signature(&mut self) -> Result<Vec<u8>> {
        if self.stage == BuildStage::Empty {
            self.compute_hashes()?;
        }
        if self.stage == BuildStage::HashesComputed {
            self.assemble_directories()?;
        }
        if self.stage == BuildStage::DirectoriesAssembled {
            self.attach_signature()?;
        }
        self.expect_stage(BuildStage::SignatureAttached, "build_code_signature")?;
        self.superblob
            .clone()
            .ok_or_else(|| Error::Signing("signature missing".into()))
    }

    /// Writes the SuperBlob at the start of the reserved region and zeroes
    /// the rest of it.
    pub fn embed(&mut self) -> Result<()> {
        self.expect_stage(BuildStage::SignatureAttached, "embed")?;
        let superblob = self
            .superblob
            .as_deref()
            .ok_or_else(|| Error::Signing("signature missing".into()))?;

        let start = self.code_limit as usize;
        let end = start + self.capacity as usize;
        let region = self
            .container
            .data_mut()
            .get_mut(start..end)
            .ok_or_else(|| Error::Capacity("signature region lies outside the file".into()))?;
        let (used, rest) = region.split_at_mut(superblob.len());
        used.copy_from_slice(superblob);
        rest.fill(0);

        self.stage = BuildStage::Embedded;
        Ok(())
    }

    /// [`build_code_signature`](Self::build_code_signature), then [`embed`](Self::embed).
    pub fn sign(mut self) -> Result<()> {
        self.build_code_signature()?;
        self.embed()
    }
}

impl MachOContainer {
    /// Signs the slice in place. Space must have been reserved first.
    pub fn sign(&mut self, asset: Option<&SigningAsset>, inputs: SignatureInputs) -> Result<()> {
        CodeSignatureBuilder::new(self, asset, inputs).sign()
    }
}

/// True when the entitlements grant `get-task-allow`.
fn get_task_allow(xml: &[u8]) -> bool {
    plist::from_bytes::<plist::Value>(xml)
        .ok()
        .and_then(|value| {
            value
                .as_dictionary()
                .and_then(|d| d.get("get-task-allow"))
                .and_then(plist::Value::as_boolean)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_digests() {
        let digests = SlotDigests::of(b"abc");
        assert_eq!(digests.for_digest(DigestType::Sha1), sha1(b"abc").to_vec());
        assert_eq!(digests.for_digest(DigestType::Sha256).len(), 32);
    }

    #[test]
    fn test_get_task_allow() {
        let yes = br#"<?xml version="1.0"?><plist version="1.0"><dict><key>get-task-allow</key><true/></dict></plist>"#;
        let no = br#"<?xml version="1.0"?><plist version="1.0"><dict><key>get-task-allow</key><false/></dict></plist>"#;
        assert!(get_task_allow(yes));
        assert!(!get_task_allow(no));
        assert!(!get_task_allow(b"garbage"));
    }

    #[test]
    fn test_stages_are_ordered() {
        assert!(BuildStage::Empty < BuildStage::HashesComputed);
        assert!(BuildStage::SignatureAttached < BuildStage::Embedded);
    }
}
