use std::fmt;

/// Where a signing attempt failed once a credential was already in hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStage {
    /// Opening the backend or reaching the private key.
    BackendAccess,
    /// Building the signature dictionary or the CMS container.
    LibrarySigning,
    /// Writing or re-reading the output file.
    OutputVerification,
}

impl fmt::Display for SigningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SigningStage::BackendAccess => "backend access",
            SigningStage::LibrarySigning => "library signing",
            SigningStage::OutputVerification => "output verification",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A token module, key database or bundle could not be opened at all.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    /// An empty credential was tried and refused.
    #[error("A password or PIN is required to unlock the private key")]
    PasswordRequired,
    /// The supplied password or PIN was rejected.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),
    /// The certificate exists but the backend holds no private key for it.
    #[error("Private key not found for certificate `{0}`")]
    KeyNotFound(String),
    /// Found, but expired, not yet valid, self-signed or without signing usage.
    #[error("Certificate not usable for signing: {0}")]
    CertificateNotUsable(String),
    #[error("Invalid signature profile: {0}")]
    InvalidProfile(String),
    #[error("Signature profile not found: {0}")]
    ProfileNotFound(String),
    #[error("Built-in signature profile `{0}` can not be deleted")]
    BuiltInProfile(String),
    #[error("Invalid signature position: {0}")]
    InvalidPosition(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Signing failed during {stage}: {source}")]
    Signing {
        stage: SigningStage,
        #[source]
        source: Box<Error>,
    },
    #[error("PDF error: {0}")]
    LoPdfError(#[from] lopdf::Error),
    #[error("Integer conversion error: {0}")]
    TryFromIntError(#[from] std::num::TryFromIntError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("PKCS#11 error: {0}")]
    Pkcs11(#[from] cryptoki::error::Error),
    #[error("CMS error: {0}")]
    Cms(#[from] cryptographic_message_syntax::CmsError),
    #[error("X.509 error: {0}")]
    X509(#[from] x509_certificate::X509CertificateError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("PNG encoding error: {0}")]
    PngEncoding(#[from] png::EncodingError),
    #[error("PNG decoding error: {0}")]
    PngDecoding(#[from] png::DecodingError),
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn at_stage(self, stage: SigningStage) -> Self {
        match self {
            // Credential and lookup errors keep their own identity so callers can branch on them.
            err if err.is_credential_error() => err,
            err @ (Error::KeyNotFound(_)
            | Error::BackendUnavailable(_)
            | Error::CertificateNotFound(_)
            | Error::CertificateNotUsable(_)
            | Error::Signing { .. }) => err,
            err => Error::Signing {
                stage,
                source: Box::new(err),
            },
        }
    }

    /// True for a wrong, missing or locked password/PIN.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Error::PasswordRequired | Error::AuthenticationFailed(_)
        )
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::Other(err.to_owned())
    }
}
