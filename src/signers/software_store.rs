use super::{CredentialSigner, KeyFamily, SignerIdentity};
use crate::certificate::fingerprint;
use crate::loaders::software_store::parse_bundle;
use crate::{BackendHint, Certificate, Error};
use openssl::md::Md;
use openssl::pkey::{Id, PKey, Private};
use openssl::pkey_ctx::PkeyCtx;
use openssl::rsa::Padding;
use std::fs;
use x509_certificate::CapturedX509Certificate;

/// Signs with the private key of an unlocked PKCS#12 bundle.
pub struct SoftwareStoreSigner {
    identity: SignerIdentity,
    key: Option<PKey<Private>>,
    chain: Vec<CapturedX509Certificate>,
}

impl SoftwareStoreSigner {
    pub fn open(certificate: &Certificate, password: &str) -> Result<Self, Error> {
        let BackendHint::SoftwareStore { file_path } = &certificate.backend else {
            return Err(Error::Other(format!(
                "`{}` is not a software store certificate",
                certificate.name
            )));
        };
        let data = fs::read(file_path).map_err(|err| {
            Error::BackendUnavailable(format!("Can not read `{}`: {}", file_path.display(), err))
        })?;

        let parsed = if password.is_empty() {
            if !certificate.pin_optional {
                return Err(Error::PasswordRequired);
            }
            parse_bundle(&data, "").map_err(|err| match err {
                Error::AuthenticationFailed(_) => Error::PasswordRequired,
                other => other,
            })?
        } else {
            parse_bundle(&data, password)?
        };

        let leaf = parsed
            .cert
            .ok_or_else(|| Error::CertificateNotFound(file_path.display().to_string()))?;
        if fingerprint(&leaf.to_der()?) != certificate.fingerprint {
            return Err(Error::CertificateNotFound(format!(
                "`{}` no longer contains certificate {}",
                file_path.display(),
                certificate.fingerprint
            )));
        }
        let key = parsed
            .pkey
            .ok_or_else(|| Error::KeyNotFound(certificate.name.clone()))?;

        let mut chain = vec![];
        if let Some(ca) = parsed.ca {
            for issuer in ca.iter() {
                chain.push(CapturedX509Certificate::from_der(issuer.to_der()?)?);
            }
        }
        log::debug!(
            "Unlocked `{}` with {} chain certificate(s).",
            file_path.display(),
            chain.len()
        );

        Ok(SoftwareStoreSigner {
            identity: SignerIdentity::new(certificate)?,
            key: Some(key),
            chain,
        })
    }
}

impl CredentialSigner for SoftwareStoreSigner {
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, Error> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::Other("Signer is already closed".to_owned()))?;
        let mut ctx = PkeyCtx::new(key)?;
        ctx.sign_init()?;
        match key.id() {
            Id::RSA => {
                ctx.set_rsa_padding(Padding::PKCS1)?;
                ctx.set_signature_md(Md::sha256())?;
            }
            Id::EC => ctx.set_signature_md(Md::sha256())?,
            other => {
                return Err(Error::CertificateNotUsable(format!(
                    "unsupported key type {:?}",
                    other
                )))
            }
        }
        let mut signature = vec![];
        ctx.sign_to_vec(digest, &mut signature)?;
        Ok(signature)
    }

    fn public_key(&self) -> &[u8] {
        &self.identity.public_key
    }

    fn certificate(&self) -> &Certificate {
        &self.identity.certificate
    }

    fn x509_certificate(&self) -> &CapturedX509Certificate {
        &self.identity.x509
    }

    fn key_family(&self) -> KeyFamily {
        self.identity.family
    }

    fn chain(&self) -> &[CapturedX509Certificate] {
        &self.chain
    }

    fn close(&mut self) -> Result<(), Error> {
        self.key = None;
        Ok(())
    }
}

impl Drop for SoftwareStoreSigner {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use openssl::hash::MessageDigest;
    use openssl::sign::Verifier;
    use sha2::{Digest, Sha256};
    use std::path::Path;

    fn bundle_certificate(path: &Path, password: &str) -> Certificate {
        let (ca, ca_key) = test_support::mint_ca("Signer Root");
        let (leaf, key) = test_support::mint_leaf(&ca, &ca_key, "Sam Signer", true);
        fs::write(path, test_support::p12_bundle(&leaf, &key, password)).unwrap();
        crate::loaders::software_store::load_bundle_certificate(path)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn signs_digest_that_openssl_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sam.p12");
        let certificate = bundle_certificate(&path, "");

        let mut signer = SoftwareStoreSigner::open(&certificate, "").unwrap();
        let message = b"signed attributes";
        let signature = signer.sign(&Sha256::digest(message)).unwrap();

        let x509 = openssl::x509::X509::from_der(&certificate.der).unwrap();
        let public_key = x509.public_key().unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key).unwrap();
        verifier.update(message).unwrap();
        assert!(verifier.verify(&signature).unwrap());
        assert_eq!(signer.key_family(), KeyFamily::Rsa);

        signer.close().unwrap();
        signer.close().unwrap();
        assert!(signer.sign(&Sha256::digest(message)).is_err());
    }

    #[test]
    fn credential_errors_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.p12");
        let certificate = bundle_certificate(&path, "hunter2");

        assert!(matches!(
            SoftwareStoreSigner::open(&certificate, ""),
            Err(Error::PasswordRequired)
        ));
        assert!(matches!(
            SoftwareStoreSigner::open(&certificate, "wrong"),
            Err(Error::AuthenticationFailed(_))
        ));
        assert!(SoftwareStoreSigner::open(&certificate, "hunter2").is_ok());

        fs::remove_file(&path).unwrap();
        assert!(matches!(
            SoftwareStoreSigner::open(&certificate, "hunter2"),
            Err(Error::BackendUnavailable(_))
        ));
    }
}
