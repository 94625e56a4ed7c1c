//! The common shape every certificate backend normalizes into.

use crate::Error;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use x509_parser::prelude::*;

/// Name used when neither the certificate nor the backend offers one.
pub const UNKNOWN_CERTIFICATE_NAME: &str = "Unknown Certificate";

/// Where a certificate was discovered. The declaration order is the
/// de-duplication priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateSource {
    SoftwareStore,
    Token,
    TrustDatabase,
}

impl fmt::Display for CertificateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificateSource::SoftwareStore => "software-store",
            CertificateSource::Token => "token",
            CertificateSource::TrustDatabase => "trust-database",
        })
    }
}

impl FromStr for CertificateSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "software-store" | "software" | "pkcs12" => Ok(CertificateSource::SoftwareStore),
            "token" | "pkcs11" => Ok(CertificateSource::Token),
            "trust-database" | "nss" | "nssdb" => Ok(CertificateSource::TrustDatabase),
            other => Err(Error::Other(format!("Unknown certificate source `{}`", other))),
        }
    }
}

/// Key usage bits from the X.509 `keyUsage` extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUsage {
    #[serde(rename = "Digital Signature")]
    DigitalSignature,
    #[serde(rename = "Non Repudiation")]
    NonRepudiation,
    #[serde(rename = "Key Encipherment")]
    KeyEncipherment,
    #[serde(rename = "Data Encipherment")]
    DataEncipherment,
    #[serde(rename = "Key Agreement")]
    KeyAgreement,
    #[serde(rename = "Certificate Sign")]
    CertificateSign,
    #[serde(rename = "CRL Sign")]
    CrlSign,
    #[serde(rename = "Encipher Only")]
    EncipherOnly,
    #[serde(rename = "Decipher Only")]
    DecipherOnly,
}

impl KeyUsage {
    pub const ALL: [KeyUsage; 9] = [
        KeyUsage::DigitalSignature,
        KeyUsage::NonRepudiation,
        KeyUsage::KeyEncipherment,
        KeyUsage::DataEncipherment,
        KeyUsage::KeyAgreement,
        KeyUsage::CertificateSign,
        KeyUsage::CrlSign,
        KeyUsage::EncipherOnly,
        KeyUsage::DecipherOnly,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            KeyUsage::DigitalSignature => "Digital Signature",
            KeyUsage::NonRepudiation => "Non Repudiation",
            KeyUsage::KeyEncipherment => "Key Encipherment",
            KeyUsage::DataEncipherment => "Data Encipherment",
            KeyUsage::KeyAgreement => "Key Agreement",
            KeyUsage::CertificateSign => "Certificate Sign",
            KeyUsage::CrlSign => "CRL Sign",
            KeyUsage::EncipherOnly => "Encipher Only",
            KeyUsage::DecipherOnly => "Decipher Only",
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for KeyUsage {
    type Err = Error;

    /// Accepts `Digital Signature`, `digital-signature` or `digitalsignature`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        KeyUsage::ALL
            .iter()
            .find(|usage| {
                usage
                    .label()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_ascii_lowercase()
                    == wanted
            })
            .copied()
            .ok_or_else(|| Error::Other(format!("Unknown key usage `{}`", s)))
    }
}

/// Backend specific data needed to reach the private key again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BackendHint {
    #[serde(rename_all = "camelCase")]
    SoftwareStore { file_path: PathBuf },
    #[serde(rename_all = "camelCase")]
    Token {
        module_path: PathBuf,
        /// `pkcs11:token=<label>;object=<label>`
        resource: String,
    },
    #[serde(rename_all = "camelCase")]
    TrustDatabase {
        database_dir: PathBuf,
        nickname: String,
    },
}

impl BackendHint {
    pub fn source(&self) -> CertificateSource {
        match self {
            BackendHint::SoftwareStore { .. } => CertificateSource::SoftwareStore,
            BackendHint::Token { .. } => CertificateSource::Token,
            BackendHint::TrustDatabase { .. } => CertificateSource::TrustDatabase,
        }
    }

    fn is_usable(&self) -> bool {
        match self {
            BackendHint::SoftwareStore { file_path } => !file_path.as_os_str().is_empty(),
            BackendHint::Token { module_path, .. } => !module_path.as_os_str().is_empty(),
            BackendHint::TrustDatabase { nickname, .. } => !nickname.is_empty(),
        }
    }
}

/// One discovered signing identity.
///
/// Built once by a loader and never changed afterwards. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub name: String,
    pub issuer: String,
    pub subject: String,
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the DER encoding.
    pub fingerprint: String,
    pub source: CertificateSource,
    pub key_usage: Vec<KeyUsage>,
    pub is_authority: bool,
    pub is_valid: bool,
    pub can_sign: bool,
    pub backend: BackendHint,
    pub requires_pin: bool,
    pub pin_optional: bool,
    #[serde(skip)]
    pub der: Vec<u8>,
}

impl Certificate {
    /// Parse a DER certificate. `fallback_name` is used when the subject has
    /// no common name (file stem, token label or database nickname).
    pub fn from_der(der: &[u8], backend: BackendHint, fallback_name: &str) -> Result<Self, Error> {
        Self::from_der_at(der, backend, fallback_name, Utc::now())
    }

    pub(crate) fn from_der_at(
        der: &[u8],
        backend: BackendHint,
        fallback_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let (_, x509) = parse_x509_certificate(der)
            .map_err(|err| Error::Other(format!("Invalid X.509 certificate: {}", err)))?;

        let name = common_name(x509.subject())
            .filter(|cn| !cn.trim().is_empty())
            .or_else(|| Some(fallback_name.to_owned()).filter(|n| !n.trim().is_empty()))
            .unwrap_or_else(|| UNKNOWN_CERTIFICATE_NAME.to_owned());

        let valid_from = to_utc(x509.validity().not_before.timestamp())?;
        let valid_to = to_utc(x509.validity().not_after.timestamp())?;

        let key_usage_ext = x509
            .key_usage()
            .map_err(|err| Error::Other(format!("Invalid keyUsage extension: {}", err)))?;
        let key_usage = key_usage_ext
            .as_ref()
            .map(|ext| key_usage_list(ext.value))
            .unwrap_or_default();
        let is_authority = x509
            .basic_constraints()
            .map_err(|err| Error::Other(format!("Invalid basicConstraints extension: {}", err)))?
            .map(|ext| ext.value.ca)
            .unwrap_or(false);

        // A missing keyUsage extension places no restriction on the key.
        let usage_allows_signing = key_usage_ext.is_none()
            || key_usage.contains(&KeyUsage::DigitalSignature)
            || key_usage.contains(&KeyUsage::NonRepudiation);

        Ok(Certificate {
            name,
            issuer: x509.issuer().to_string(),
            subject: x509.subject().to_string(),
            serial_number: hex::encode_upper(x509.tbs_certificate.raw_serial()),
            is_valid: valid_from <= now && now <= valid_to,
            valid_from,
            valid_to,
            fingerprint: fingerprint(der),
            source: backend.source(),
            key_usage,
            is_authority,
            can_sign: !is_authority && usage_allows_signing && backend.is_usable(),
            backend,
            requires_pin: true,
            pin_optional: false,
            der: der.to_vec(),
        })
    }

    /// Set whether an empty credential may unlock the key.
    pub fn with_credential_policy(mut self, requires_pin: bool, pin_optional: bool) -> Self {
        self.requires_pin = requires_pin;
        self.pin_optional = pin_optional;
        self
    }

    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    pub fn has_key_usage(&self, usage: KeyUsage) -> bool {
        self.key_usage.contains(&usage)
    }

    /// `can_sign` or an explicit signing key usage.
    pub fn has_signing_capability(&self) -> bool {
        self.can_sign
            || self.has_key_usage(KeyUsage::DigitalSignature)
            || self.has_key_usage(KeyUsage::NonRepudiation)
    }

    pub fn key_usage_summary(&self) -> String {
        self.key_usage
            .iter()
            .map(KeyUsage::label)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Lowercase hex SHA-256 of a DER encoded certificate.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

pub(crate) fn common_name(name: &X509Name) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned)
}

/// Loaders skip certificates that could never sign: authorities and keys
/// restricted to other purposes.
pub(crate) fn is_signing_candidate(der: &[u8]) -> bool {
    match parse_x509_certificate(der) {
        Ok((_, x509)) => {
            let is_ca = matches!(x509.basic_constraints(), Ok(Some(ext)) if ext.value.ca);
            let usage_ok = match x509.key_usage() {
                Ok(Some(ext)) => ext.value.digital_signature() || ext.value.non_repudiation(),
                Ok(None) => true,
                Err(_) => false,
            };
            !is_ca && usage_ok
        }
        Err(err) => {
            log::debug!("Skipping unparsable certificate: {}", err);
            false
        }
    }
}

fn key_usage_list(ku: &x509_parser::extensions::KeyUsage) -> Vec<KeyUsage> {
    let flags = [
        (ku.digital_signature(), KeyUsage::DigitalSignature),
        (ku.non_repudiation(), KeyUsage::NonRepudiation),
        (ku.key_encipherment(), KeyUsage::KeyEncipherment),
        (ku.data_encipherment(), KeyUsage::DataEncipherment),
        (ku.key_agreement(), KeyUsage::KeyAgreement),
        (ku.key_cert_sign(), KeyUsage::CertificateSign),
        (ku.crl_sign(), KeyUsage::CrlSign),
        (ku.encipher_only(), KeyUsage::EncipherOnly),
        (ku.decipher_only(), KeyUsage::DecipherOnly),
    ];
    flags
        .into_iter()
        .filter_map(|(set, usage)| set.then_some(usage))
        .collect()
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>, Error> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| Error::Other(format!("Certificate time out of range: {}", timestamp)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn store_hint() -> BackendHint {
        BackendHint::SoftwareStore {
            file_path: PathBuf::from("/home/user/.certificates/alice.p12"),
        }
    }

    #[test]
    fn leaf_certificate_is_signable() {
        let (ca, ca_key) = test_support::mint_ca("Test Root");
        let (leaf, _) = test_support::mint_leaf(&ca, &ca_key, "Alice Example", true);
        let der = leaf.to_der().unwrap();

        let cert = Certificate::from_der(&der, store_hint(), "alice").unwrap();
        assert_eq!(cert.name, "Alice Example");
        assert_eq!(cert.source, CertificateSource::SoftwareStore);
        assert_eq!(cert.fingerprint, fingerprint(&der));
        assert_eq!(cert.fingerprint.len(), 64);
        assert!(cert.is_valid);
        assert!(cert.can_sign);
        assert!(!cert.is_self_signed());
        assert!(cert.has_key_usage(KeyUsage::DigitalSignature));
        assert!(cert.subject.contains("Alice Example"));
        assert!(cert.issuer.contains("Test Root"));
    }

    #[test]
    fn authority_can_not_sign() {
        let (ca, _) = test_support::mint_ca("Test Root");
        let der = ca.to_der().unwrap();
        let cert = Certificate::from_der(&der, store_hint(), "root").unwrap();
        assert!(cert.is_authority);
        assert!(!cert.can_sign);
        assert!(cert.is_self_signed());
        assert!(!is_signing_candidate(&der));
    }

    #[test]
    fn expired_certificate_is_not_valid() {
        let (ca, ca_key) = test_support::mint_ca("Test Root");
        let leaf = test_support::mint_expired_leaf(&ca, &ca_key, "Old Bob");
        let cert = Certificate::from_der(&leaf.to_der().unwrap(), store_hint(), "").unwrap();
        assert!(!cert.is_valid);
    }

    #[test]
    fn empty_backend_hint_blocks_signing() {
        let (ca, ca_key) = test_support::mint_ca("Test Root");
        let (leaf, _) = test_support::mint_leaf(&ca, &ca_key, "Carol", true);
        let hint = BackendHint::TrustDatabase {
            database_dir: PathBuf::from("/tmp/nssdb"),
            nickname: String::new(),
        };
        let cert = Certificate::from_der(&leaf.to_der().unwrap(), hint, "").unwrap();
        assert!(!cert.can_sign);
        assert!(cert.has_signing_capability());
    }

    #[test]
    fn key_usage_parses_loose_spelling() {
        assert_eq!(
            "digital-signature".parse::<KeyUsage>().unwrap(),
            KeyUsage::DigitalSignature
        );
        assert_eq!("CRL Sign".parse::<KeyUsage>().unwrap(), KeyUsage::CrlSign);
        assert!("teleport".parse::<KeyUsage>().is_err());
    }
}
