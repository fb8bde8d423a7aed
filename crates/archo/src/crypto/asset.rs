//! Signing identity: certificate, private key, and provisioning profile.
//!
//! Credentials load from a PEM certificate plus PKCS#8 key, or from a PKCS#12
//! container. Everything stays in memory; the key is never written out.
//!
//! ```no_run
//! use archo::SigningAsset;
//! use secrecy::SecretString;
//!
//! let p12 = std::fs::read("identity.p12")?;
//! let asset = SigningAsset::from_p12(&p12, &SecretString::new("password".into()))?
//!     .with_provisioning_profile("embedded.mobileprovision")?;
//! println!("team {:?}", asset.team_id);
//! # Ok::<(), archo::Error>(())
//! ```

use crate::{Error, Result};
use cryptographic_message_syntax::SignedData;
use log::debug;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::fs;
use std::path::Path;
use x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair, Sign};

/// Certificate and key used to produce the CMS blob of a signature.
pub struct SigningAsset {
    /// Leaf certificate matching `signing_key`.
    pub certificate: CapturedX509Certificate,
    /// Intermediates embedded in the CMS after the leaf.
    pub chain: Vec<CapturedX509Certificate>,
    pub signing_key: InMemorySigningKeyPair,
    /// First OU of the certificate subject.
    pub team_id: Option<String>,
    /// XML plist, from a provisioning profile or set explicitly.
    pub entitlements: Option<Vec<u8>>,
}

impl fmt::Debug for SigningAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningAsset")
            .field("common_name", &self.common_name())
            .field("chain", &self.chain.len())
            .field("team_id", &self.team_id)
            .field("entitlements", &self.entitlements.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

impl SigningAsset {
    /// Load from a PEM (or DER) certificate and a PKCS#8 private key in PEM
    /// or DER form.
    ///
    /// # Errors
    ///
    /// [`Error::Certificate`] if either fails to parse or the key does not
    /// belong to the certificate.
    pub fn from_pem(cert_data: &[u8], key_data: &[u8]) -> Result<Self> {
        let certificate = CapturedX509Certificate::from_pem(cert_data)
            .or_else(|_| CapturedX509Certificate::from_der(cert_data.to_vec()))
            .map_err(|e| Error::Certificate(format!("failed to load certificate: {e}")))?;

        let signing_key = InMemorySigningKeyPair::from_pkcs8_pem(key_data)
            .or_else(|_| InMemorySigningKeyPair::from_pkcs8_der(key_data))
            .map_err(|e| Error::Certificate(format!("failed to load private key: {e}")))?;

        Self::new(certificate, Vec::new(), signing_key)
    }

    /// Load from a PKCS#12 container.
    ///
    /// The leaf is the certificate whose public key matches the first key
    /// bag; every other certificate becomes the chain.
    pub fn from_p12(p12_data: &[u8], password: &SecretString) -> Result<Self> {
        let pfx = p12::PFX::parse(p12_data)
            .map_err(|e| Error::Certificate(format!("failed to parse PKCS#12: {e:?}")))?;
        let password = password.expose_secret();

        let keys = pfx
            .key_bags(password)
            .map_err(|e| Error::Certificate(format!("failed to decrypt PKCS#12 keys: {e:?}")))?;
        let certs = pfx
            .cert_x509_bags(password)
            .map_err(|e| Error::Certificate(format!("failed to decrypt PKCS#12 certificates: {e:?}")))?;

        let key_der = keys
            .first()
            .ok_or_else(|| Error::Certificate("no private key in PKCS#12".into()))?;
        let signing_key = InMemorySigningKeyPair::from_pkcs8_der(key_der)
            .map_err(|e| Error::Certificate(format!("failed to load private key: {e}")))?;

        let mut certs = certs
            .into_iter()
            .map(|der| {
                CapturedX509Certificate::from_der(der)
                    .map_err(|e| Error::Certificate(format!("bad certificate in PKCS#12: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        if certs.is_empty() {
            return Err(Error::Certificate("no certificate in PKCS#12".into()));
        }

        let public_key = signing_key.public_key_data();
        let leaf = certs
            .iter()
            .position(|c| c.public_key_data() == public_key)
            .unwrap_or(0);
        let certificate = certs.remove(leaf);

        Self::new(certificate, certs, signing_key)
    }

    fn new(
        certificate: CapturedX509Certificate,
        chain: Vec<CapturedX509Certificate>,
        signing_key: InMemorySigningKeyPair,
    ) -> Result<Self> {
        if certificate.public_key_data() != signing_key.public_key_data() {
            return Err(Error::Certificate(
                "private key does not match certificate public key".into(),
            ));
        }

        let team_id = certificate
            .subject_name()
            .iter_organizational_unit()
            .find_map(|atv| atv.to_string().ok());
        debug!(
            "loaded certificate {:?} (team {:?}, {} chain certificates)",
            certificate.subject_common_name(),
            team_id,
            chain.len()
        );

        Ok(Self {
            certificate,
            chain,
            signing_key,
            team_id,
            entitlements: None,
        })
    }

    /// Appends intermediates (PEM, possibly several per buffer).
    pub fn with_chain_pem(mut self, pem: &[u8]) -> Result<Self> {
        let certs = CapturedX509Certificate::from_pem_multiple(pem)
            .map_err(|e| Error::Certificate(format!("failed to load chain: {e}")))?;
        self.chain.extend(certs);
        Ok(self)
    }

    /// Takes entitlements from a provisioning profile.
    pub fn with_provisioning_profile(mut self, profile_path: impl AsRef<Path>) -> Result<Self> {
        let profile_data = fs::read(profile_path)?;
        self.entitlements = Some(extract_entitlements_from_profile(&profile_data)?);
        Ok(self)
    }

    /// Subject common name of the leaf certificate.
    pub fn common_name(&self) -> Option<String> {
        self.certificate.subject_common_name()
    }
}

/// Extracts the `Entitlements` dictionary of a provisioning profile and
/// re-serializes it as an XML plist.
///
/// The profile is a CMS `SignedData` wrapping a plist. When the CMS does not
/// parse, the first `<?xml ... </plist>` span is used instead.
pub fn extract_entitlements_from_profile(data: &[u8]) -> Result<Vec<u8>> {
    let content = match SignedData::parse_ber(data) {
        Ok(signed) => signed.signed_content().map(<[u8]>::to_vec),
        Err(_) => None,
    };
    let plist_data = match content {
        Some(content) => content,
        None => embedded_plist(data)?.to_vec(),
    };

    let plist: plist::Value = plist::from_bytes(&plist_data)
        .map_err(|e| Error::ProvisioningProfile(format!("failed to parse plist: {e}")))?;
    let entitlements = plist
        .as_dictionary()
        .ok_or_else(|| Error::ProvisioningProfile("profile is not a dictionary".into()))?
        .get("Entitlements")
        .ok_or_else(|| Error::ProvisioningProfile("no Entitlements in profile".into()))?;

    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, entitlements)
        .map_err(|e| Error::ProvisioningProfile(format!("failed to serialize: {e}")))?;
    Ok(buf)
}

fn embedded_plist(data: &[u8]) -> Result<&[u8]> {
    const START: &[u8] = b"<?xml";
    const END: &[u8] = b"</plist>";

    let start = data
        .windows(START.len())
        .position(|w| w == START)
        .ok_or_else(|| Error::ProvisioningProfile("no plist found in profile".into()))?;
    let end = data[start..]
        .windows(END.len())
        .position(|w| w == END)
        .map(|p| start + p + END.len())
        .ok_or_else(|| Error::ProvisioningProfile("unterminated plist in profile".into()))?;
    Ok(&data[start..end])
}
