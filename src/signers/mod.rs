//! One signing capability over three credential backends.
//!
//! A signer is opened for a single signing call and released afterwards.
//! Every implementation also releases its backend resources on drop, so an
//! early return never leaves a token session or an unlocked key behind.

mod cms;
mod encoding;
mod nss;
mod software_store;
mod token;
mod trust_database;

use crate::config::Settings;
use crate::{Certificate, CertificateSource, Error};
use x509_certificate::{CapturedX509Certificate, KeyAlgorithm};

pub(crate) use cms::CmsKey;
pub use encoding::KeyFamily;
pub use software_store::SoftwareStoreSigner;
pub use token::TokenSigner;
pub use trust_database::TrustDatabaseSigner;

pub trait CredentialSigner {
    /// Sign a SHA-256 digest. RSA keys return a PKCS#1 v1.5 signature, EC
    /// keys a DER `ECDSA-Sig-Value`.
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, Error>;

    /// Subject public key bytes of the signing certificate.
    fn public_key(&self) -> &[u8];

    fn certificate(&self) -> &Certificate;

    fn x509_certificate(&self) -> &CapturedX509Certificate;

    fn key_family(&self) -> KeyFamily;

    /// Issuer certificates the backend keeps next to the key.
    fn chain(&self) -> &[CapturedX509Certificate] {
        &[]
    }

    /// Release the session or key material. Calling it twice is harmless.
    fn close(&mut self) -> Result<(), Error>;
}

/// Pick the signer matching where the certificate was discovered.
pub fn open_signer(
    certificate: &Certificate,
    credential: &str,
    settings: &Settings,
) -> Result<Box<dyn CredentialSigner>, Error> {
    log::debug!(
        "Opening {} signer for `{}`.",
        certificate.source,
        certificate.name
    );
    Ok(match certificate.source {
        CertificateSource::SoftwareStore => {
            Box::new(SoftwareStoreSigner::open(certificate, credential)?)
        }
        CertificateSource::Token => Box::new(TokenSigner::open(certificate, credential)?),
        CertificateSource::TrustDatabase => Box::new(TrustDatabaseSigner::open(
            certificate,
            credential,
            settings.nss_library.as_deref(),
        )?),
    })
}

/// Certificate data every signer carries.
#[derive(Debug, Clone)]
pub(crate) struct SignerIdentity {
    pub certificate: Certificate,
    pub x509: CapturedX509Certificate,
    pub public_key: Vec<u8>,
    pub family: KeyFamily,
}

impl SignerIdentity {
    pub fn new(certificate: &Certificate) -> Result<Self, Error> {
        let x509 = CapturedX509Certificate::from_der(certificate.der.clone())?;
        let family = match x509.key_algorithm() {
            Some(KeyAlgorithm::Rsa) => KeyFamily::Rsa,
            Some(KeyAlgorithm::Ecdsa(_)) => KeyFamily::Ec,
            other => {
                return Err(Error::CertificateNotUsable(format!(
                    "unsupported key algorithm {:?} for `{}`",
                    other, certificate.name
                )))
            }
        };
        let public_key = x509.public_key_data().to_vec();
        Ok(SignerIdentity {
            certificate: certificate.clone(),
            x509,
            public_key,
            family,
        })
    }
}
