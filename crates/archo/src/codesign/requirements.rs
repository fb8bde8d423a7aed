//! Requirement blobs (special slot -2).
//!
//! Only two shapes are produced: the empty set used for ad-hoc signatures,
//! and a designated requirement binding the identifier to the signing
//! certificate:
//!
//! ```text
//! designated => identifier "<id>" and anchor apple generic
//!     and certificate leaf[subject.CN] = "<cn>"
//!     and certificate 1[field.1.2.840.113635.100.6.2.1] exists
//! ```

use super::constants::*;

/// DER of OID 1.2.840.113635.100.6.2.1 (Apple WWDR intermediate marker).
const WWDR_INTERMEDIATE_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x63, 0x64, 0x06, 0x02, 0x01];

/// Expression kind of a single requirement: requirement expression.
const REQUIREMENT_KIND_EXPR: u32 = 1;

/// An empty requirement set: magic, length 12, count 0.
pub fn empty_requirements() -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.extend(CSMAGIC_REQUIREMENTS.to_be_bytes());
    buf.extend(12u32.to_be_bytes());
    buf.extend(0u32.to_be_bytes());
    buf
}

/// Length-prefixed data item, padded to a 4-byte boundary.
fn push_data(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend((data.len() as u32).to_be_bytes());
    buf.extend(data);
    let padding = (4 - data.len() % 4) % 4;
    buf.extend(std::iter::repeat(0u8).take(padding));
}

fn push_op(buf: &mut Vec<u8>, op: u32) {
    buf.extend(op.to_be_bytes());
}

/// Designated requirement set for `identifier` signed by the certificate
/// whose subject common name is `common_name`.
pub fn designated_requirement(identifier: &str, common_name: &str) -> Vec<u8> {
    let mut expr = Vec::new();
    push_op(&mut expr, OP_AND);
    push_op(&mut expr, OP_IDENT);
    push_data(&mut expr, identifier.as_bytes());

    push_op(&mut expr, OP_AND);
    push_op(&mut expr, OP_APPLE_GENERIC_ANCHOR);

    push_op(&mut expr, OP_AND);
    push_op(&mut expr, OP_CERT_FIELD);
    expr.extend(0u32.to_be_bytes()); // leaf
    push_data(&mut expr, b"subject.CN");
    push_op(&mut expr, MATCH_EQUAL);
    push_data(&mut expr, common_name.as_bytes());

    push_op(&mut expr, OP_CERT_GENERIC);
    expr.extend(1u32.to_be_bytes()); // first intermediate
    push_data(&mut expr, WWDR_INTERMEDIATE_OID);
    push_op(&mut expr, MATCH_EXISTS);

    // Requirement blob: magic, length, kind, expression
    let requirement_len = 12 + expr.len() as u32;
    let mut requirement = Vec::with_capacity(requirement_len as usize);
    requirement.extend(CSMAGIC_REQUIREMENT.to_be_bytes());
    requirement.extend(requirement_len.to_be_bytes());
    requirement.extend(REQUIREMENT_KIND_EXPR.to_be_bytes());
    requirement.extend(expr);

    // Requirement set with a single designated entry at offset 20
    let set_len = 20 + requirement_len;
    let mut set = Vec::with_capacity(set_len as usize);
    set.extend(CSMAGIC_REQUIREMENTS.to_be_bytes());
    set.extend(set_len.to_be_bytes());
    set.extend(1u32.to_be_bytes());
    set.extend(CSREQ_DESIGNATED.to_be_bytes());
    set.extend(20u32.to_be_bytes());
    set.extend(requirement);
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be32(blob: &[u8], at: usize) -> u32 {
        u32::from_be_bytes(blob[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn test_empty_requirements() {
        let req = empty_requirements();
        assert_eq!(req.len(), 12);
        assert_eq!(be32(&req, 0), CSMAGIC_REQUIREMENTS);
        assert_eq!(be32(&req, 4), 12);
        assert_eq!(be32(&req, 8), 0);
    }

    #[test]
    fn test_push_data_pads_to_four() {
        let mut buf = Vec::new();
        push_data(&mut buf, b"abcde");
        assert_eq!(buf, vec![0, 0, 0, 5, b'a', b'b', b'c', b'd', b'e', 0, 0, 0]);

        let mut buf = Vec::new();
        push_data(&mut buf, b"abcd");
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_designated_requirement_layout() {
        let set = designated_requirement("com.example.app", "Apple Development: Jane");

        assert_eq!(be32(&set, 0), CSMAGIC_REQUIREMENTS);
        assert_eq!(be32(&set, 4) as usize, set.len());
        assert_eq!(be32(&set, 8), 1);
        assert_eq!(be32(&set, 12), CSREQ_DESIGNATED);
        assert_eq!(be32(&set, 16), 20);

        let requirement = &set[20..];
        assert_eq!(be32(requirement, 0), CSMAGIC_REQUIREMENT);
        assert_eq!(be32(requirement, 4) as usize, requirement.len());
        assert_eq!(be32(requirement, 8), REQUIREMENT_KIND_EXPR);
        // and(ident "com.example.app", ...)
        assert_eq!(be32(requirement, 12), OP_AND);
        assert_eq!(be32(requirement, 16), OP_IDENT);
        assert_eq!(be32(requirement, 20), 15);
        assert_eq!(&requirement[24..39], b"com.example.app");

        assert_eq!(set.len() % 4, 0);
        assert!(set.windows(WWDR_INTERMEDIATE_OID.len()).any(|w| w == WWDR_INTERMEDIATE_OID));
    }
}
