//! Digest and signature encodings for backends that only expose a raw
//! sign primitive (`CKM_RSA_PKCS`, `CKM_ECDSA`).

use crate::Error;
use der::asn1::UintRef;
use der::{Encode, Sequence};

/// DER prefix of a SHA-256 `DigestInfo`, the digest bytes follow.
const SHA256_DIGEST_INFO_PREFIX: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];

pub(crate) const SHA256_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
}

#[derive(Sequence)]
struct EcdsaSigValue<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

pub(crate) fn sha256_digest_info(digest: &[u8]) -> Result<Vec<u8>, Error> {
    if digest.len() != SHA256_LEN {
        return Err(Error::Other(format!(
            "Expected a {} byte SHA-256 digest, got {} bytes",
            SHA256_LEN,
            digest.len()
        )));
    }
    let mut digest_info = SHA256_DIGEST_INFO_PREFIX.to_vec();
    digest_info.extend_from_slice(digest);
    Ok(digest_info)
}

/// Re-encode a fixed width `r || s` signature as `ECDSA-Sig-Value`.
pub(crate) fn ecdsa_raw_to_der(raw: &[u8]) -> Result<Vec<u8>, Error> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(Error::Other(format!(
            "Raw ECDSA signature has odd length {}",
            raw.len()
        )));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    let to_error = |err: der::Error| Error::Other(format!("Can not encode ECDSA signature: {}", err));
    let value = EcdsaSigValue {
        r: UintRef::new(r).map_err(to_error)?,
        s: UintRef::new(s).map_err(to_error)?,
    };
    value.to_der().map_err(to_error)
}

/// The input a raw sign primitive expects for a SHA-256 digest.
pub(crate) fn raw_sign_input(family: KeyFamily, digest: &[u8]) -> Result<Vec<u8>, Error> {
    match family {
        KeyFamily::Rsa => sha256_digest_info(digest),
        KeyFamily::Ec => Ok(digest.to_vec()),
    }
}

/// Turn the raw primitive output into what CMS carries.
pub(crate) fn raw_sign_output(family: KeyFamily, raw: Vec<u8>) -> Result<Vec<u8>, Error> {
    match family {
        KeyFamily::Rsa => Ok(raw),
        KeyFamily::Ec => ecdsa_raw_to_der(&raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_info_wraps_sha256() {
        let digest = [0xab; 32];
        let wrapped = sha256_digest_info(&digest).unwrap();
        assert_eq!(wrapped.len(), 51);
        assert_eq!(&wrapped[..19], &SHA256_DIGEST_INFO_PREFIX);
        assert_eq!(&wrapped[19..], &digest);
        assert!(sha256_digest_info(&[0u8; 20]).is_err());
    }

    #[test]
    fn ecdsa_signature_becomes_der_sequence() {
        // High bit set on r needs a leading zero, s has leading zeros to strip.
        let mut raw = vec![0x80; 32];
        raw.extend(std::iter::repeat(0x00).take(31));
        raw.push(0x01);
        let der = ecdsa_raw_to_der(&raw).unwrap();
        assert_eq!(der[0], 0x30);
        // INTEGER r: 33 bytes with 0x00 prefix.
        assert_eq!(&der[2..5], &[0x02, 33, 0x00]);
        // INTEGER s: single byte 0x01.
        assert_eq!(&der[der.len() - 3..], &[0x02, 0x01, 0x01]);
        assert!(ecdsa_raw_to_der(&[1, 2, 3]).is_err());
    }

    #[test]
    fn raw_input_depends_on_family() {
        let digest = [7u8; 32];
        assert_eq!(raw_sign_input(KeyFamily::Ec, &digest).unwrap(), digest.to_vec());
        assert_eq!(raw_sign_input(KeyFamily::Rsa, &digest).unwrap().len(), 51);
    }
}
