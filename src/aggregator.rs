//! Merges the backend loaders into one de-duplicated certificate list.

use crate::config::Settings;
use crate::loaders::{CertificateLoader, SoftwareStoreLoader, TokenLoader, TrustDatabaseLoader};
use crate::{Certificate, CertificateSource, Error, KeyUsage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Selection applied after de-duplication. Empty fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateFilter {
    pub source: Option<CertificateSource>,
    pub search: Option<String>,
    #[serde(default)]
    pub valid_only: bool,
    pub required_key_usage: Option<KeyUsage>,
}

impl CertificateFilter {
    pub fn search(term: &str) -> Self {
        CertificateFilter {
            search: Some(term.to_owned()),
            ..Default::default()
        }
    }

    pub fn matches(&self, certificate: &Certificate) -> bool {
        if let Some(source) = self.source {
            if certificate.source != source {
                return false;
            }
        }
        if let Some(term) = self.search.as_deref().filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            let found = [
                &certificate.name,
                &certificate.subject,
                &certificate.issuer,
                &certificate.serial_number,
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&term));
            if !found {
                return false;
            }
        }
        if self.valid_only && !certificate.is_valid {
            return false;
        }
        if let Some(usage) = self.required_key_usage {
            if !certificate.has_key_usage(usage) {
                return false;
            }
        }
        true
    }
}

/// Calls every loader in priority order on each request. Nothing is cached.
pub struct CertificateAggregator {
    loaders: Vec<Box<dyn CertificateLoader>>,
}

impl CertificateAggregator {
    /// Loaders are consulted in the given order, the first one to report a
    /// fingerprint wins.
    pub fn new(loaders: Vec<Box<dyn CertificateLoader>>) -> Self {
        CertificateAggregator { loaders }
    }

    /// Software store, then tokens, then the NSS database.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut loaders: Vec<Box<dyn CertificateLoader>> = vec![
            Box::new(SoftwareStoreLoader::new(settings.certificate_stores.clone())),
            Box::new(TokenLoader::new(settings.token_libraries.clone())),
        ];
        if let Some(database_dir) = &settings.trust_database {
            loaders.push(Box::new(TrustDatabaseLoader::with_certutil(
                database_dir.clone(),
            )));
        }
        Self::new(loaders)
    }

    pub fn list(&self, filter: &CertificateFilter) -> Result<Vec<Certificate>, Error> {
        let mut seen = HashSet::new();
        let mut certificates = vec![];
        for loader in &self.loaders {
            let loaded = match loader.load() {
                Ok(loaded) => loaded,
                Err(err) => {
                    log::warn!("Loading {} certificates failed: {}", loader.source(), err);
                    continue;
                }
            };
            log::debug!("Found {} {} certificate(s).", loaded.len(), loader.source());
            for certificate in loaded {
                if certificate.fingerprint.is_empty() {
                    return Err(Error::Other(format!(
                        "Certificate `{}` has no fingerprint",
                        certificate.name
                    )));
                }
                if seen.insert(certificate.fingerprint.clone()) {
                    certificates.push(certificate);
                } else {
                    log::debug!(
                        "Dropping duplicate {} certificate `{}`.",
                        certificate.source,
                        certificate.name
                    );
                }
            }
        }
        certificates.retain(|certificate| filter.matches(certificate));
        Ok(certificates)
    }

    pub fn search(&self, term: &str) -> Result<Vec<Certificate>, Error> {
        self.list(&CertificateFilter::search(term))
    }

    /// Look up one certificate by fingerprint, case-insensitively.
    pub fn find(&self, fingerprint: &str) -> Result<Certificate, Error> {
        let wanted = fingerprint.trim().to_ascii_lowercase();
        self.list(&CertificateFilter::default())?
            .into_iter()
            .find(|certificate| certificate.fingerprint == wanted)
            .ok_or_else(|| Error::CertificateNotFound(fingerprint.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackendHint;
    use chrono::{Duration, Utc};
    use std::path::PathBuf;

    struct FixedLoader {
        source: CertificateSource,
        certificates: Vec<Certificate>,
    }

    impl CertificateLoader for FixedLoader {
        fn source(&self) -> CertificateSource {
            self.source
        }

        fn load(&self) -> Result<Vec<Certificate>, Error> {
            Ok(self.certificates.clone())
        }
    }

    struct BrokenLoader;

    impl CertificateLoader for BrokenLoader {
        fn source(&self) -> CertificateSource {
            CertificateSource::Token
        }

        fn load(&self) -> Result<Vec<Certificate>, Error> {
            Err(Error::BackendUnavailable("module crashed".to_owned()))
        }
    }

    fn certificate(name: &str, fingerprint: &str, source: CertificateSource) -> Certificate {
        let backend = match source {
            CertificateSource::SoftwareStore => BackendHint::SoftwareStore {
                file_path: PathBuf::from(format!("/certs/{}.p12", name)),
            },
            CertificateSource::Token => BackendHint::Token {
                module_path: PathBuf::from("/usr/lib/opensc-pkcs11.so"),
                resource: format!("pkcs11:token=Card;object={}", name),
            },
            CertificateSource::TrustDatabase => BackendHint::TrustDatabase {
                database_dir: PathBuf::from("/home/u/.pki/nssdb"),
                nickname: name.to_owned(),
            },
        };
        let now = Utc::now();
        Certificate {
            name: name.to_owned(),
            issuer: "CN=Example CA,O=Example".to_owned(),
            subject: format!("CN={},O=Example", name),
            serial_number: "0A1B2C".to_owned(),
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(1),
            fingerprint: fingerprint.to_owned(),
            source,
            key_usage: vec![KeyUsage::DigitalSignature],
            is_authority: false,
            is_valid: true,
            can_sign: true,
            backend,
            requires_pin: source == CertificateSource::Token,
            pin_optional: false,
            der: vec![],
        }
    }

    fn aggregator() -> CertificateAggregator {
        let mut expired = certificate("Expired Eve", "ee", CertificateSource::TrustDatabase);
        expired.is_valid = false;
        let mut encrypting = certificate("Cipher Cid", "cc", CertificateSource::Token);
        encrypting.key_usage = vec![KeyUsage::KeyEncipherment];

        CertificateAggregator::new(vec![
            Box::new(FixedLoader {
                source: CertificateSource::SoftwareStore,
                certificates: vec![certificate("Alice", "aa", CertificateSource::SoftwareStore)],
            }),
            Box::new(BrokenLoader),
            Box::new(FixedLoader {
                source: CertificateSource::Token,
                certificates: vec![
                    certificate("Alice on card", "aa", CertificateSource::Token),
                    certificate("Bob", "bb", CertificateSource::Token),
                    encrypting,
                ],
            }),
            Box::new(FixedLoader {
                source: CertificateSource::TrustDatabase,
                certificates: vec![
                    certificate("Bob in NSS", "bb", CertificateSource::TrustDatabase),
                    expired,
                ],
            }),
        ])
    }

    #[test]
    fn duplicates_keep_the_highest_priority_backend() {
        let certificates = aggregator().list(&CertificateFilter::default()).unwrap();
        let fingerprints: Vec<&str> = certificates.iter().map(|c| c.fingerprint.as_str()).collect();
        assert_eq!(fingerprints, vec!["aa", "bb", "cc", "ee"]);
        assert_eq!(certificates[0].source, CertificateSource::SoftwareStore);
        assert_eq!(certificates[1].source, CertificateSource::Token);
        assert_eq!(certificates[1].name, "Bob");
    }

    #[test]
    fn filters_combine() {
        let aggregator = aggregator();
        let valid = aggregator
            .list(&CertificateFilter {
                valid_only: true,
                ..Default::default()
            })
            .unwrap();
        assert!(valid.iter().all(|c| c.is_valid));
        assert_eq!(valid.len(), 3);

        let tokens = aggregator
            .list(&CertificateFilter {
                source: Some(CertificateSource::Token),
                required_key_usage: Some(KeyUsage::DigitalSignature),
                ..Default::default()
            })
            .unwrap();
        let names: Vec<&str> = tokens.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Bob"]);
    }

    #[test]
    fn search_is_case_insensitive_over_identity_fields() {
        let aggregator = aggregator();
        let found = aggregator.search("aLiCe").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Alice");

        // Issuer matches every entry.
        assert_eq!(aggregator.search("example ca").unwrap().len(), 4);
        // Serial number.
        assert_eq!(aggregator.search("1b2c").unwrap().len(), 4);
        assert!(aggregator.search("nobody").unwrap().is_empty());
    }

    #[test]
    fn find_by_fingerprint() {
        let aggregator = aggregator();
        assert_eq!(aggregator.find("BB").unwrap().name, "Bob");
        assert!(matches!(
            aggregator.find("ff"),
            Err(Error::CertificateNotFound(_))
        ));
    }
}
