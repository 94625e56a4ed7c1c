//! Backend paths and renderer options, persisted as JSON.

use crate::Error;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// System directories a certificate store may live in.
pub const SYSTEM_CERTIFICATE_ROOTS: [&str; 4] = [
    "/etc/ssl",
    "/etc/pki",
    "/usr/share/ca-certificates",
    "/usr/local/share/ca-certificates",
];

const DEFAULT_SYSTEM_STORES: [&str; 2] = ["/etc/ssl/certs", "/etc/pki/tls/certs"];
const DEFAULT_USER_STORES: [&str; 2] = [".certificates", ".local/share/certificates"];
const DEFAULT_TOKEN_LIBRARIES: [&str; 5] = [
    "/usr/lib/libbit4xpki.so",
    "/usr/lib/libbit4ipki.so",
    "/usr/lib/x86_64-linux-gnu/opensc-pkcs11.so",
    "/usr/lib/opensc-pkcs11.so",
    "/usr/lib/pkcs11/opensc-pkcs11.so",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Directories scanned for PKCS#12 bundles, in priority order.
    pub certificate_stores: Vec<PathBuf>,
    /// PKCS#11 modules, in priority order.
    pub token_libraries: Vec<PathBuf>,
    /// NSS `sql:` database directory.
    pub trust_database: Option<PathBuf>,
    /// Overrides the NSS shared library name.
    pub nss_library: Option<PathBuf>,
    /// TrueType fonts tried in order by the appearance renderer.
    pub font_paths: Vec<PathBuf>,
    /// Allow the stamp's location line to be looked up online.
    pub location_lookup: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir();
        let mut certificate_stores: Vec<PathBuf> =
            DEFAULT_SYSTEM_STORES.iter().map(PathBuf::from).collect();
        if let Some(home) = &home {
            certificate_stores.extend(DEFAULT_USER_STORES.iter().map(|dir| home.join(dir)));
        }
        Settings {
            certificate_stores,
            token_libraries: DEFAULT_TOKEN_LIBRARIES.iter().map(PathBuf::from).collect(),
            trust_database: home.map(|home| home.join(".pki").join("nssdb")),
            nss_library: None,
            font_paths: vec![],
            location_lookup: false,
        }
    }
}

/// Settings backed by a JSON file at an explicit path.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    /// `~/.config/pdf-signing/config.json`, used by the command line front end.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pdf-signing").join("config.json"))
    }

    /// Load the file, or start from defaults when it does not exist yet.
    pub fn open(path: PathBuf) -> Result<Self, Error> {
        let settings = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(SettingsStore {
            path,
            settings: RwLock::new(settings),
        })
    }

    pub fn get(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn update(&self, settings: Settings) -> Result<(), Error> {
        let mut current = self.settings.write();
        *current = settings;
        self.save(&current)
    }

    pub fn add_certificate_store(&self, directory: &Path) -> Result<PathBuf, Error> {
        let resolved = validate_certificate_store(directory, dirs::home_dir().as_deref())?;
        self.modify(|settings| {
            push_unique(&mut settings.certificate_stores, resolved.clone())?;
            Ok(resolved.clone())
        })
    }

    pub fn remove_certificate_store(&self, directory: &Path) -> Result<(), Error> {
        self.modify(|settings| remove_entry(&mut settings.certificate_stores, directory))
    }

    pub fn add_token_library(&self, library: &Path) -> Result<PathBuf, Error> {
        let resolved = validate_token_library(library)?;
        self.modify(|settings| {
            push_unique(&mut settings.token_libraries, resolved.clone())?;
            Ok(resolved.clone())
        })
    }

    pub fn remove_token_library(&self, library: &Path) -> Result<(), Error> {
        self.modify(|settings| remove_entry(&mut settings.token_libraries, library))
    }

    fn modify<T>(&self, change: impl FnOnce(&mut Settings) -> Result<T, Error>) -> Result<T, Error> {
        let mut settings = self.settings.write();
        let mut updated = settings.clone();
        let result = change(&mut updated)?;
        self.save(&updated)?;
        *settings = updated;
        Ok(result)
    }

    /// Write to a temporary file next to the target and rename it over.
    fn save(&self, settings: &Settings) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            create_private_dir(parent)?;
        }
        let data = serde_json::to_vec_pretty(settings)?;
        let tmp_path = self.path.with_extension("json.tmp");
        write_private_file(&tmp_path, &data)?;
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }
}

fn push_unique(list: &mut Vec<PathBuf>, path: PathBuf) -> Result<(), Error> {
    if list.contains(&path) {
        return Err(Error::InvalidConfiguration(format!(
            "`{}` is already configured",
            path.display()
        )));
    }
    list.push(path);
    Ok(())
}

fn remove_entry(list: &mut Vec<PathBuf>, path: &Path) -> Result<(), Error> {
    let resolved = fs::canonicalize(path).ok();
    let before = list.len();
    list.retain(|entry| entry != path && Some(entry) != resolved.as_ref());
    if list.len() == before {
        return Err(Error::InvalidConfiguration(format!(
            "`{}` is not configured",
            path.display()
        )));
    }
    Ok(())
}

fn require_absolute(path: &Path) -> Result<(), Error> {
    if !path.is_absolute() {
        return Err(Error::InvalidConfiguration(format!(
            "`{}` is not an absolute path",
            path.display()
        )));
    }
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(Error::InvalidConfiguration(format!(
            "`{}` contains `..`",
            path.display()
        )));
    }
    Ok(())
}

/// Resolve symlinks and require the home tree or a system certificate root.
pub fn validate_certificate_store(directory: &Path, home: Option<&Path>) -> Result<PathBuf, Error> {
    require_absolute(directory)?;
    let resolved = fs::canonicalize(directory).map_err(|err| {
        Error::InvalidConfiguration(format!("Can not resolve `{}`: {}", directory.display(), err))
    })?;
    if !resolved.is_dir() {
        return Err(Error::InvalidConfiguration(format!(
            "`{}` is not a directory",
            resolved.display()
        )));
    }
    let home = home.and_then(|home| fs::canonicalize(home).ok());
    let allowed = home.iter().any(|home| resolved.starts_with(home))
        || SYSTEM_CERTIFICATE_ROOTS
            .iter()
            .any(|root| resolved.starts_with(root));
    if !allowed {
        return Err(Error::InvalidConfiguration(format!(
            "`{}` is outside the home directory and the system certificate directories",
            resolved.display()
        )));
    }
    Ok(resolved)
}

/// Resolve symlinks and require a shared library file name.
pub fn validate_token_library(library: &Path) -> Result<PathBuf, Error> {
    require_absolute(library)?;
    let resolved = fs::canonicalize(library).map_err(|err| {
        Error::InvalidConfiguration(format!("Can not resolve `{}`: {}", library.display(), err))
    })?;
    if !resolved.is_file() {
        return Err(Error::InvalidConfiguration(format!(
            "`{}` is not a file",
            resolved.display()
        )));
    }
    // Both the configured name and the link target must look like a library.
    if !is_shared_library(library) || !is_shared_library(&resolved) {
        return Err(Error::InvalidConfiguration(format!(
            "`{}` is not a shared library (.so, .dylib or .dll)",
            library.display()
        )));
    }
    Ok(resolved)
}

/// `.so`, `.so.<version>`, `.dylib` or `.dll`.
pub(crate) fn is_shared_library(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    if name.ends_with(".dylib") || name.ends_with(".dll") || name.ends_with(".so") {
        return true;
    }
    match name.split_once(".so.") {
        Some((stem, version)) => {
            !stem.is_empty()
                && !version.is_empty()
                && version
                    .split('.')
                    .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        }
        None => false,
    }
}

pub(crate) fn create_private_dir(dir: &Path) -> Result<(), Error> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;
    Ok(())
}

/// Write a file readable and writable by the owner only.
pub(crate) fn write_private_file(path: &Path, data: &[u8]) -> Result<(), Error> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_library_names() {
        assert!(is_shared_library(Path::new("/usr/lib/opensc-pkcs11.so")));
        assert!(is_shared_library(Path::new("/usr/lib/libnss3.so.1")));
        assert!(is_shared_library(Path::new("/opt/lib/libeToken.so.10.2")));
        assert!(is_shared_library(Path::new("C:/Windows/System32/bit4xpki.DLL")));
        assert!(is_shared_library(Path::new("/usr/local/lib/libykcs11.dylib")));
        assert!(!is_shared_library(Path::new("/usr/lib/pkcs11.sox")));
        assert!(!is_shared_library(Path::new("/usr/lib/lib.so.x1")));
        assert!(!is_shared_library(Path::new("/usr/bin/certutil")));
    }

    #[test]
    fn certificate_store_must_be_inside_home() {
        let home = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let store = home.path().join("certs");
        fs::create_dir(&store).unwrap();

        let resolved = validate_certificate_store(&store, Some(home.path())).unwrap();
        assert_eq!(resolved, fs::canonicalize(&store).unwrap());

        assert!(matches!(
            validate_certificate_store(outside.path(), Some(home.path())),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(validate_certificate_store(Path::new("certs"), Some(home.path())).is_err());
        assert!(validate_certificate_store(
            &home.path().join("certs/../certs"),
            Some(home.path())
        )
        .is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_home_is_rejected() {
        let home = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link = home.path().join("escape");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();
        assert!(validate_certificate_store(&link, Some(home.path())).is_err());
    }

    #[test]
    fn token_library_needs_library_extension() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("libtoken.so.2");
        let script = dir.path().join("token.sh");
        fs::write(&library, b"").unwrap();
        fs::write(&script, b"").unwrap();

        assert!(validate_token_library(&library).is_ok());
        assert!(validate_token_library(&script).is_err());
        assert!(validate_token_library(&dir.path().join("missing.so")).is_err());
    }

    #[test]
    fn store_persists_changes() {
        let home = tempfile::tempdir().unwrap();
        let config_path = home.path().join("config").join("config.json");
        let store = SettingsStore::open(config_path.clone()).unwrap();

        let library = home.path().join("libdemo.so");
        fs::write(&library, b"").unwrap();
        let resolved = store.add_token_library(&library).unwrap();
        assert!(store.get().token_libraries.contains(&resolved));
        assert!(matches!(
            store.add_token_library(&library),
            Err(Error::InvalidConfiguration(_))
        ));

        let reopened = SettingsStore::open(config_path.clone()).unwrap();
        assert_eq!(reopened.get(), store.get());

        reopened.remove_token_library(&library).unwrap();
        assert!(!reopened.get().token_libraries.contains(&resolved));
        assert!(reopened.remove_token_library(&library).is_err());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&config_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
