use super::CertificateLoader;
use crate::{BackendHint, Certificate, CertificateSource, Error};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as Pkcs11Error, RvError};
use cryptoki::object::{Attribute, AttributeType, ObjectClass};
use cryptoki::session::Session;
use cryptoki::slot::Slot;
use std::path::{Path, PathBuf};

/// A certificate object read from a token.
#[derive(Debug, Clone)]
pub(crate) struct TokenCertificate {
    pub label: String,
    pub id: Vec<u8>,
    pub der: Vec<u8>,
}

/// Lists certificate objects on every token reachable through the
/// configured PKCS#11 modules.
#[derive(Debug, Clone, Default)]
pub struct TokenLoader {
    modules: Vec<PathBuf>,
}

impl TokenLoader {
    pub fn new(modules: Vec<PathBuf>) -> Self {
        TokenLoader { modules }
    }

    fn load_module(&self, module_path: &Path) -> Result<Vec<Certificate>, Error> {
        let pkcs11 = open_module(module_path)?;
        let mut certificates = vec![];
        for slot in pkcs11.get_slots_with_token()? {
            match Self::load_slot(&pkcs11, slot, module_path) {
                Ok(mut found) => certificates.append(&mut found),
                Err(err) => log::warn!(
                    "Skipping slot {} of `{}`: {}",
                    slot.id(),
                    module_path.display(),
                    err
                ),
            }
        }
        Ok(certificates)
    }

    fn load_slot(
        pkcs11: &Pkcs11,
        slot: Slot,
        module_path: &Path,
    ) -> Result<Vec<Certificate>, Error> {
        let token_label = pkcs11.get_token_info(slot)?.label().trim().to_owned();
        let session = pkcs11.open_ro_session(slot)?;
        let mut certificates = vec![];
        for object in list_certificates(&session)? {
            if !crate::certificate::is_signing_candidate(&object.der) {
                continue;
            }
            let hint = BackendHint::Token {
                module_path: module_path.to_path_buf(),
                resource: resource_locator(&token_label, &object.label),
            };
            let fallback_name = if object.label.is_empty() {
                token_label.as_str()
            } else {
                object.label.as_str()
            };
            match Certificate::from_der(&object.der, hint, fallback_name) {
                // Tokens never sign without a PIN.
                Ok(certificate) => {
                    certificates.push(certificate.with_credential_policy(true, false))
                }
                Err(err) => log::warn!(
                    "Skipping certificate `{}` on token `{}`: {}",
                    object.label,
                    token_label,
                    err
                ),
            }
        }
        Ok(certificates)
    }
}

impl CertificateLoader for TokenLoader {
    fn source(&self) -> CertificateSource {
        CertificateSource::Token
    }

    fn load(&self) -> Result<Vec<Certificate>, Error> {
        let mut certificates = vec![];
        for module_path in &self.modules {
            if !module_path.exists() {
                log::debug!("PKCS#11 module `{}` is not installed.", module_path.display());
                continue;
            }
            match self.load_module(module_path) {
                Ok(mut found) => certificates.append(&mut found),
                Err(err) => log::warn!(
                    "Skipping PKCS#11 module `{}`: {}",
                    module_path.display(),
                    err
                ),
            }
        }
        Ok(certificates)
    }
}

/// `pkcs11:token=<label>;object=<label>`
pub(crate) fn resource_locator(token_label: &str, object_label: &str) -> String {
    format!("pkcs11:token={};object={}", token_label, object_label)
}

/// Load and initialise a module. A module that another part of the process
/// already initialised is accepted as is.
pub(crate) fn open_module(module_path: &Path) -> Result<Pkcs11, Error> {
    let pkcs11 = Pkcs11::new(module_path).map_err(|err| {
        Error::BackendUnavailable(format!(
            "Can not load PKCS#11 module `{}`: {}",
            module_path.display(),
            err
        ))
    })?;
    match pkcs11.initialize(CInitializeArgs::OsThreads) {
        Ok(()) | Err(Pkcs11Error::Pkcs11(RvError::CryptokiAlreadyInitialized, ..)) => Ok(pkcs11),
        Err(err) => Err(Error::BackendUnavailable(format!(
            "Can not initialise PKCS#11 module `{}`: {}",
            module_path.display(),
            err
        ))),
    }
}

pub(crate) fn list_certificates(session: &Session) -> Result<Vec<TokenCertificate>, Error> {
    let handles = session.find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])?;
    let mut certificates = vec![];
    for handle in handles {
        let attributes = session.get_attributes(
            handle,
            &[AttributeType::Value, AttributeType::Label, AttributeType::Id],
        )?;
        let mut object = TokenCertificate {
            label: String::new(),
            id: vec![],
            der: vec![],
        };
        for attribute in attributes {
            match attribute {
                Attribute::Value(value) => object.der = value,
                Attribute::Label(label) => {
                    object.label = String::from_utf8_lossy(&label).trim().to_owned()
                }
                Attribute::Id(id) => object.id = id,
                _ => {}
            }
        }
        if object.der.is_empty() {
            log::debug!("Certificate object `{}` has no value.", object.label);
            continue;
        }
        certificates.push(object);
    }
    Ok(certificates)
}
