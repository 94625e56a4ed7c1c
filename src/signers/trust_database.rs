use super::encoding::{raw_sign_input, raw_sign_output};
use super::nss::{NssApi, PrivateKeyHandle};
use super::{CredentialSigner, KeyFamily, SignerIdentity};
use crate::{BackendHint, Certificate, Error};
use std::path::Path;
use x509_certificate::CapturedX509Certificate;

/// Signs with a key stored in the shared NSS database.
pub struct TrustDatabaseSigner {
    identity: SignerIdentity,
    key: Option<PrivateKeyHandle>,
}

impl TrustDatabaseSigner {
    pub fn open(
        certificate: &Certificate,
        password: &str,
        library: Option<&Path>,
    ) -> Result<Self, Error> {
        let BackendHint::TrustDatabase {
            database_dir,
            nickname,
        } = &certificate.backend
        else {
            return Err(Error::Other(format!(
                "`{}` is not an NSS database certificate",
                certificate.name
            )));
        };
        let identity = SignerIdentity::new(certificate)?;
        let nss = NssApi::get(library)?;
        nss.initialize(database_dir)?;

        let slot = nss.internal_key_slot()?;
        let needs_login = slot.needs_login();
        if needs_login && !password.is_empty() && !slot.check_password(password)? {
            return Err(Error::AuthenticationFailed(
                "NSS database password rejected".to_owned(),
            ));
        }

        let cert = nss
            .find_certificate(nickname)?
            .ok_or_else(|| Error::CertificateNotFound(nickname.clone()))?;
        let key = match cert.private_key() {
            Some(key) => key,
            None if needs_login && password.is_empty() => return Err(Error::PasswordRequired),
            None => return Err(Error::KeyNotFound(certificate.name.clone())),
        };
        log::debug!(
            "Using NSS key for `{}` from `{}`.",
            nickname,
            database_dir.display()
        );

        Ok(TrustDatabaseSigner {
            identity,
            key: Some(key),
        })
    }
}

impl CredentialSigner for TrustDatabaseSigner {
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, Error> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::Other("Signer is already closed".to_owned()))?;
        let input = raw_sign_input(self.identity.family, digest)?;
        raw_sign_output(self.identity.family, key.sign(&input)?)
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

    fn close(&mut self) -> Result<(), Error> {
        self.key = None;
        Ok(())
    }
}
