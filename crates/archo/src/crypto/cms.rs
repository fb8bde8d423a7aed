//! CMS signing with Apple CDHash attributes
//!
//! The signature is a detached `SignedData` over the slot-0 CodeDirectory.
//! Two signed attributes let the verifier match every directory in the
//! SuperBlob: a plist listing the cdhashes, and the full SHA-256 cdhash.

use crate::{Error, Result};
use bcder::encode::PrimitiveContent;
use bcder::{ConstOid, Mode, Oid};
use bytes::Bytes;
use cryptographic_message_syntax::{asn1::rfc5652::OID_ID_DATA, SignedDataBuilder, SignerBuilder};
use log::debug;
use x509_certificate::{
    rfc5652::AttributeValue, CapturedX509Certificate, DigestAlgorithm, KeyInfoSigner,
};

/// Apple CDHash plist attribute: 1.2.840.113635.100.9.1
pub const CDHASH_PLIST_OID: ConstOid = Oid(&[42, 134, 72, 134, 247, 99, 100, 9, 1]);

/// Apple CDHash v2 attribute: 1.2.840.113635.100.9.2
pub const CDHASH_SHA256_OID: ConstOid = Oid(&[42, 134, 72, 134, 247, 99, 100, 9, 2]);

/// Generate a detached CMS signature with Apple CDHash attributes.
///
/// # Arguments
///
/// * `data` - The CodeDirectory bytes to sign
/// * `signing_key` - The private key
/// * `signing_cert` - The certificate matching `signing_key`
/// * `cert_chain` - Intermediate certificates embedded after the leaf
/// * `cdhash_sha1` - SHA-1 cdhash of the SHA-1 CodeDirectory
/// * `cdhash_sha256` - SHA-256 cdhash of the SHA-256 CodeDirectory
pub fn sign_with_apple_attrs<K: KeyInfoSigner>(
    data: &[u8],
    signing_key: &K,
    signing_cert: &CapturedX509Certificate,
    cert_chain: &[CapturedX509Certificate],
    cdhash_sha1: &[u8; 20],
    cdhash_sha256: &[u8; 32],
) -> Result<Vec<u8>> {
    let cdhash_plist = build_cdhash_plist(cdhash_sha1, cdhash_sha256)?;

    let cdhash_v2 = AttributeValue::new(bcder::Captured::from_values(
        Mode::Der,
        bcder::encode::sequence((
            Oid::from(DigestAlgorithm::Sha256).encode_ref(),
            bcder::OctetString::new(Bytes::copy_from_slice(cdhash_sha256)).encode_ref(),
        )),
    ));

    let signer = SignerBuilder::new(signing_key, signing_cert.clone())
        .signed_attribute_octet_string(
            Oid(Bytes::copy_from_slice(CDHASH_PLIST_OID.as_ref())),
            &cdhash_plist,
        )
        .signed_attribute(Oid(CDHASH_SHA256_OID.as_ref().into()), vec![cdhash_v2]);

    // Apple uses the `data` content type even though signers are present.
    let mut builder = SignedDataBuilder::default()
        .content_external(data.to_vec())
        .content_type(Oid(OID_ID_DATA.as_ref().into()))
        .signer(signer);

    for cert in cert_chain {
        builder = builder.certificate(cert.clone());
    }

    let der = builder
        .build_der()
        .map_err(|e| Error::Crypto(format!("failed to build CMS signature: {e}")))?;
    debug!("CMS signature is {} bytes", der.len());

    Ok(der)
}

/// Build CDHash plist for Apple attribute
///
/// Creates an XML plist with a "cdhashes" array holding the SHA-1 cdhash and
/// the SHA-256 cdhash truncated to 20 bytes.
pub fn build_cdhash_plist(sha1: &[u8; 20], sha256: &[u8; 32]) -> Result<Vec<u8>> {
    use plist::{Dictionary, Value};

    let mut dict = Dictionary::new();
    dict.insert(
        "cdhashes".to_string(),
        Value::Array(vec![
            Value::Data(sha1.to_vec()),
            Value::Data(sha256[..20].to_vec()),
        ]),
    );

    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, &Value::Dictionary(dict))?;
    buf.push(b'\n');
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_cdhash_plist() {
        let plist = build_cdhash_plist(&[0u8; 20], &[0u8; 32]).unwrap();

        let plist_str = String::from_utf8_lossy(&plist);
        assert!(plist_str.contains("cdhashes"));
        assert!(plist_str.contains("<array>"));
        assert!(plist_str.ends_with("</plist>\n"));
    }

    #[test]
    fn test_build_cdhash_plist_with_real_hashes() {
        let sha1: [u8; 20] = [
            0x2f, 0xd4, 0xe1, 0xc6, 0x7a, 0x2d, 0x28, 0xfc, 0xed, 0x84, 0x9e, 0xe1, 0xbb, 0x76,
            0xe7, 0x39, 0x1b, 0x93, 0xeb, 0x12,
        ];
        let sha256: [u8; 32] = [
            0xd7, 0xa8, 0xfb, 0xb3, 0x07, 0xd7, 0x80, 0x94, 0x69, 0xca, 0x9a, 0xbc, 0xb0, 0x08,
            0x2e, 0x4f, 0x8d, 0x56, 0x51, 0xe4, 0x6d, 0x3c, 0xdb, 0x76, 0x2d, 0x02, 0xd0, 0xbf,
            0x37, 0xc9, 0xe5, 0x92,
        ];

        let plist = build_cdhash_plist(&sha1, &sha256).unwrap();

        let parsed: plist::Value = plist::from_bytes(&plist).unwrap();
        let cdhashes = parsed
            .as_dictionary()
            .and_then(|d| d.get("cdhashes"))
            .and_then(|v| v.as_array())
            .unwrap();

        assert_eq!(cdhashes.len(), 2);
        assert_eq!(cdhashes[0].as_data().unwrap(), sha1);
        assert_eq!(cdhashes[1].as_data().unwrap(), &sha256[..20]);
    }

    #[test]
    fn test_apple_oids() {
        assert_eq!(CDHASH_PLIST_OID.as_ref().len(), 9);
        assert_eq!(CDHASH_PLIST_OID.as_ref()[8], 1);
        assert_eq!(CDHASH_SHA256_OID.as_ref()[8], 2);
    }
}
