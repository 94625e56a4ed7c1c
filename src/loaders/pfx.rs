//! Reads the certificates of a PKCS#12 bundle that are stored without
//! password based encryption.
//!
//! Most bundles only shroud the key bag, which lets the certificate be
//! listed before the user types a password.

use der::asn1::{Any, ObjectIdentifier, OctetString};
use der::{Decode, DecodeOwned, Encode, Sequence};

const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const CERT_BAG: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.12.10.1.3");
const X509_CERTIFICATE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.22.1");

#[derive(Sequence)]
struct Pfx {
    version: u8,
    auth_safe: ContentInfo,
    mac_data: Option<Any>,
}

#[derive(Sequence)]
struct ContentInfo {
    content_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    content: Option<Any>,
}

#[derive(Sequence)]
struct SafeBag {
    bag_id: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    bag_value: Any,
    bag_attributes: Option<Any>,
}

#[derive(Sequence)]
struct CertBag {
    cert_id: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    cert_value: OctetString,
}

fn decode_any<T: DecodeOwned>(any: &Any) -> der::Result<T> {
    T::from_der(&any.to_der()?)
}

/// DER certificates found in plain `data` safe contents, in bundle order.
pub(crate) fn unprotected_certificates(bundle: &[u8]) -> der::Result<Vec<Vec<u8>>> {
    let pfx = Pfx::from_der(bundle)?;
    if pfx.version != 3 {
        log::debug!("Unexpected PKCS#12 version {}", pfx.version);
    }
    if pfx.auth_safe.content_type != ID_DATA {
        // Public key integrity mode, not used by any common tool.
        return Ok(vec![]);
    }
    let auth_safe = match &pfx.auth_safe.content {
        Some(content) => decode_any::<OctetString>(content)?,
        None => return Ok(vec![]),
    };

    let mut certificates = vec![];
    for safe_contents in Vec::<ContentInfo>::from_der(auth_safe.as_bytes())? {
        // `encryptedData` needs the password.
        if safe_contents.content_type != ID_DATA {
            continue;
        }
        let Some(content) = &safe_contents.content else {
            continue;
        };
        let bags_der = decode_any::<OctetString>(content)?;
        for bag in Vec::<SafeBag>::from_der(bags_der.as_bytes())? {
            if bag.bag_id != CERT_BAG {
                continue;
            }
            let cert_bag: CertBag = decode_any(&bag.bag_value)?;
            if cert_bag.cert_id == X509_CERTIFICATE {
                certificates.push(cert_bag.cert_value.as_bytes().to_vec());
            }
        }
    }
    Ok(certificates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn finds_certificate_in_password_protected_bundle() {
        let (ca, ca_key) = test_support::mint_ca("Bundle Root");
        let (leaf, key) = test_support::mint_leaf(&ca, &ca_key, "Dana", true);
        let bundle = test_support::p12_bundle(&leaf, &key, "correct horse");

        let certificates = unprotected_certificates(&bundle).unwrap();
        assert_eq!(certificates, vec![leaf.to_der().unwrap()]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(unprotected_certificates(b"not a bundle").is_err());
    }
}
