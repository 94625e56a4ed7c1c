use super::CertificateLoader;
use crate::{BackendHint, Certificate, CertificateSource, Error};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// One certificate entry of the shared NSS database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustEntry {
    pub nickname: String,
    /// `SSL,S/MIME,JAR/XPI` trust flags as printed by `certutil`.
    pub trust_flags: String,
    pub der: Vec<u8>,
}

impl TrustEntry {
    /// The `u` flag marks a certificate with a private key in the database.
    pub fn has_private_key(&self) -> bool {
        self.trust_flags.contains('u')
    }
}

/// Read access to the database entries.
pub trait TrustStoreListing {
    fn database_dir(&self) -> &Path;

    fn entries(&self) -> Result<Vec<TrustEntry>, Error>;
}

/// Lists a `sql:` NSS database with the `certutil` tool.
#[derive(Debug, Clone)]
pub struct CertutilDatabase {
    database_dir: PathBuf,
    certutil: PathBuf,
}

impl CertutilDatabase {
    pub fn new(database_dir: PathBuf) -> Self {
        CertutilDatabase {
            database_dir,
            certutil: PathBuf::from("certutil"),
        }
    }

    pub fn with_certutil(mut self, certutil: PathBuf) -> Self {
        self.certutil = certutil;
        self
    }

    fn database_arg(&self) -> String {
        format!("sql:{}", self.database_dir.display())
    }

    fn run(&self, args: &[&str]) -> Result<String, Error> {
        let output = Command::new(&self.certutil)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                Error::BackendUnavailable(format!(
                    "Can not run `{}`: {}",
                    self.certutil.display(),
                    err
                ))
            })?;
        if !output.status.success() {
            return Err(Error::BackendUnavailable(format!(
                "`certutil {}` failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn certificate_der(&self, nickname: &str) -> Result<Vec<u8>, Error> {
        let database = self.database_arg();
        let pem = self.run(&["-L", "-d", &database, "-n", nickname, "-a"])?;
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).map_err(|err| {
            Error::Other(format!("Invalid PEM for `{}`: {}", nickname, err))
        })?;
        Ok(pem.contents)
    }
}

impl TrustStoreListing for CertutilDatabase {
    fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    fn entries(&self) -> Result<Vec<TrustEntry>, Error> {
        let listing = self.run(&["-L", "-d", &self.database_arg()])?;
        let mut entries = vec![];
        for (nickname, trust_flags) in parse_listing(&listing) {
            match self.certificate_der(&nickname) {
                Ok(der) => entries.push(TrustEntry {
                    nickname,
                    trust_flags,
                    der,
                }),
                Err(err) => log::warn!("Skipping NSS entry `{}`: {}", nickname, err),
            }
        }
        Ok(entries)
    }
}

/// Parse `certutil -L` output into `(nickname, trust flags)` pairs.
///
/// The trust flags are the last column, the nickname is everything before
/// it and may contain spaces.
pub(crate) fn parse_listing(listing: &str) -> Vec<(String, String)> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("Certificate Nickname") && !line.starts_with("SSL,"))
        .filter_map(|line| {
            let (nickname, flags) = line.rsplit_once(char::is_whitespace)?;
            let flags = flags.trim();
            // Trust flags always look like `a,b,c`.
            if flags.matches(',').count() != 2 {
                return None;
            }
            Some((nickname.trim().to_owned(), flags.to_owned()))
        })
        .collect()
}

/// Keeps the database entries that have a private key.
pub struct TrustDatabaseLoader {
    listing: Box<dyn TrustStoreListing>,
}

impl TrustDatabaseLoader {
    pub fn new(listing: Box<dyn TrustStoreListing>) -> Self {
        TrustDatabaseLoader { listing }
    }

    pub fn with_certutil(database_dir: PathBuf) -> Self {
        Self::new(Box::new(CertutilDatabase::new(database_dir)))
    }
}

impl CertificateLoader for TrustDatabaseLoader {
    fn source(&self) -> CertificateSource {
        CertificateSource::TrustDatabase
    }

    fn load(&self) -> Result<Vec<Certificate>, Error> {
        let database_dir = self.listing.database_dir();
        if !database_dir.exists() {
            log::debug!("NSS database `{}` does not exist.", database_dir.display());
            return Ok(vec![]);
        }
        let mut certificates = vec![];
        for entry in self.listing.entries()? {
            // Trust anchors without a key can not sign.
            if !entry.has_private_key() {
                continue;
            }
            if !crate::certificate::is_signing_candidate(&entry.der) {
                continue;
            }
            let hint = BackendHint::TrustDatabase {
                database_dir: database_dir.to_path_buf(),
                nickname: entry.nickname.clone(),
            };
            match Certificate::from_der(&entry.der, hint, &entry.nickname) {
                // An empty password is tried first.
                Ok(certificate) => certificates.push(certificate.with_credential_policy(false, true)),
                Err(err) => log::warn!("Skipping NSS entry `{}`: {}", entry.nickname, err),
            }
        }
        Ok(certificates)
    }
}
