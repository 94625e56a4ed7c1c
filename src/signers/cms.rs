use super::{CredentialSigner, KeyFamily};
use crate::Error;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use x509_certificate::{
    KeyAlgorithm, KeyInfoSigner, Sign, Signature, SignatureAlgorithm, X509CertificateError,
};
use zeroize::Zeroizing;

/// Presents a [`CredentialSigner`] to the CMS builder.
///
/// The builder hands over the encoded signed attributes; they are hashed
/// here and only the digest reaches the backend.
pub(crate) struct CmsKey<'a> {
    signer: &'a dyn CredentialSigner,
    failure: RefCell<Option<Error>>,
}

impl<'a> CmsKey<'a> {
    pub fn new(signer: &'a dyn CredentialSigner) -> Self {
        CmsKey {
            signer,
            failure: RefCell::new(None),
        }
    }

    /// The backend error behind the last failed signature, if any.
    pub fn take_failure(&self) -> Option<Error> {
        self.failure.borrow_mut().take()
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        match self.signer.key_family() {
            KeyFamily::Rsa => SignatureAlgorithm::RsaSha256,
            KeyFamily::Ec => SignatureAlgorithm::EcdsaSha256,
        }
    }
}

impl<'a> Sign for CmsKey<'a> {
    fn sign(&self, message: &[u8]) -> Result<(Vec<u8>, SignatureAlgorithm), X509CertificateError> {
        let digest = Sha256::digest(message);
        match self.signer.sign(&digest) {
            Ok(signature) => Ok((signature, self.algorithm())),
            Err(err) => {
                let message = err.to_string();
                *self.failure.borrow_mut() = Some(err);
                Err(X509CertificateError::Other(message))
            }
        }
    }

    fn key_algorithm(&self) -> Option<KeyAlgorithm> {
        self.signer.x509_certificate().key_algorithm()
    }

    fn public_key_data(&self) -> Bytes {
        Bytes::copy_from_slice(self.signer.public_key())
    }

    fn signature_algorithm(&self) -> Result<SignatureAlgorithm, X509CertificateError> {
        Ok(self.algorithm())
    }

    fn private_key_data(&self) -> Option<Zeroizing<Vec<u8>>> {
        None
    }

    fn rsa_primes(
        &self,
    ) -> Result<Option<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>)>, X509CertificateError> {
        Ok(None)
    }
}

impl<'a> signature::Signer<Signature> for CmsKey<'a> {
    fn try_sign(&self, msg: &[u8]) -> Result<Signature, signature::Error> {
        Sign::sign(self, msg)
            .map(|(signature, _)| Signature::from(signature))
            .map_err(|err| {
                log::debug!("CMS signature failed: {}", err);
                signature::Error::new()
            })
    }
}

impl<'a> KeyInfoSigner for CmsKey<'a> {}
