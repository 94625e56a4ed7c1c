use super::{pfx, CertificateLoader};
use crate::{BackendHint, Certificate, CertificateSource, Error};
use openssl::pkcs12::{ParsedPkcs12_2, Pkcs12};
use std::fs;
use std::path::{Path, PathBuf};

const BUNDLE_EXTENSIONS: [&str; 2] = ["p12", "pfx"];

/// Lists PKCS#12 bundles found directly inside the configured directories.
#[derive(Debug, Clone, Default)]
pub struct SoftwareStoreLoader {
    directories: Vec<PathBuf>,
}

impl SoftwareStoreLoader {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        SoftwareStoreLoader { directories }
    }

    fn load_directory(&self, directory: &Path) -> Vec<Certificate> {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(err) => {
                if directory.exists() {
                    log::warn!("Can not read certificate store `{}`: {}", directory.display(), err);
                } else {
                    log::debug!("Certificate store `{}` does not exist.", directory.display());
                }
                return vec![];
            }
        };

        let mut certificates = vec![];
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !is_bundle_file(&path) {
                continue;
            }
            match load_bundle_certificate(&path) {
                Ok(Some(certificate)) => certificates.push(certificate),
                Ok(None) => {}
                Err(err) => log::warn!("Skipping bundle `{}`: {}", path.display(), err),
            }
        }
        certificates
    }
}

impl CertificateLoader for SoftwareStoreLoader {
    fn source(&self) -> CertificateSource {
        CertificateSource::SoftwareStore
    }

    fn load(&self) -> Result<Vec<Certificate>, Error> {
        Ok(self
            .directories
            .iter()
            .flat_map(|directory| self.load_directory(directory))
            .collect())
    }
}

pub(crate) fn is_bundle_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            BUNDLE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Read the leaf certificate of a bundle without knowing its password.
///
/// Trying the empty password decides `requires_pin`. A bundle that accepts an
/// empty password is reported as not requiring one. This is a convenience
/// heuristic only and says nothing about how well the key is protected.
pub(crate) fn load_bundle_certificate(path: &Path) -> Result<Option<Certificate>, Error> {
    let data = fs::read(path)?;
    let fallback_name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hint = BackendHint::SoftwareStore {
        file_path: path.to_path_buf(),
    };

    if let Ok(parsed) = parse_bundle(&data, "") {
        let Some(leaf) = parsed.cert else {
            log::warn!("Bundle `{}` has no certificate.", path.display());
            return Ok(None);
        };
        let der = leaf.to_der()?;
        if !crate::certificate::is_signing_candidate(&der) {
            log::debug!("Bundle `{}` holds no signing certificate.", path.display());
            return Ok(None);
        }
        let certificate = Certificate::from_der(&der, hint, &fallback_name)?
            .with_credential_policy(false, true);
        return Ok(Some(certificate));
    }

    let candidates = pfx::unprotected_certificates(&data)
        .map_err(|err| Error::Other(format!("Malformed PKCS#12 structure: {}", err)))?;
    if candidates.is_empty() {
        log::warn!(
            "Bundle `{}` encrypts its certificates, it can only be listed after unlocking.",
            path.display()
        );
        return Ok(None);
    }
    let Some(der) = candidates
        .iter()
        .find(|der| crate::certificate::is_signing_candidate(der))
    else {
        log::debug!("Bundle `{}` holds no signing certificate.", path.display());
        return Ok(None);
    };
    let certificate =
        Certificate::from_der(der, hint, &fallback_name)?.with_credential_policy(true, false);
    Ok(Some(certificate))
}

pub(crate) fn parse_bundle(data: &[u8], password: &str) -> Result<ParsedPkcs12_2, Error> {
    let bundle = Pkcs12::from_der(data)
        .map_err(|err| Error::BackendUnavailable(format!("Invalid PKCS#12 file: {}", err)))?;
    bundle
        .parse2(password)
        .map_err(|err| Error::AuthenticationFailed(format!("PKCS#12 password rejected: {}", err)))
}
