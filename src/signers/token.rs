use super::encoding::{raw_sign_input, raw_sign_output};
use super::{CredentialSigner, KeyFamily, SignerIdentity};
use crate::certificate::fingerprint;
use crate::loaders::token::{list_certificates, open_module, TokenCertificate};
use crate::{BackendHint, Certificate, Error};
use cryptoki::context::Pkcs11;
use cryptoki::error::{Error as Pkcs11Error, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use x509_certificate::CapturedX509Certificate;

/// Signs with a private key object on a PKCS#11 token.
pub struct TokenSigner {
    identity: SignerIdentity,
    family: KeyFamily,
    key: ObjectHandle,
    session: Option<Session>,
    logged_in: bool,
    // Dropped after the session so the module is finalised last.
    module: Option<Pkcs11>,
}

impl TokenSigner {
    pub fn open(certificate: &Certificate, pin: &str) -> Result<Self, Error> {
        let BackendHint::Token { module_path, .. } = &certificate.backend else {
            return Err(Error::Other(format!(
                "`{}` is not a token certificate",
                certificate.name
            )));
        };
        let identity = SignerIdentity::new(certificate)?;
        let module = open_module(module_path)?;

        for slot in module.get_slots_with_token()? {
            let session = module.open_rw_session(slot)?;
            let Some(object) = list_certificates(&session)?
                .into_iter()
                .find(|object| fingerprint(&object.der) == certificate.fingerprint)
            else {
                continue;
            };
            log::debug!(
                "Found `{}` in slot {} of `{}`.",
                object.label,
                slot.id(),
                module_path.display()
            );

            let logged_in = login(&session, pin)?;
            let key = match find_private_key(&session, &object)? {
                Some(key) => key,
                // Private objects stay hidden until the user logs in.
                None if pin.is_empty() => return Err(Error::PasswordRequired),
                None => return Err(Error::KeyNotFound(certificate.name.clone())),
            };
            let family = key_family(&session, key).unwrap_or(identity.family);

            return Ok(TokenSigner {
                identity,
                family,
                key,
                session: Some(session),
                logged_in,
                module: Some(module),
            });
        }

        Err(Error::CertificateNotFound(format!(
            "{} is not present on any token of `{}`",
            certificate.fingerprint,
            module_path.display()
        )))
    }
}

/// The session calls used by login and key lookup.
trait TokenSession {
    type Handle: Copy;

    fn find_objects(&self, template: &[Attribute]) -> Result<Vec<Self::Handle>, Pkcs11Error>;

    fn login_user(&self, pin: &str) -> Result<(), Pkcs11Error>;
}

impl TokenSession for Session {
    type Handle = ObjectHandle;

    fn find_objects(&self, template: &[Attribute]) -> Result<Vec<ObjectHandle>, Pkcs11Error> {
        Session::find_objects(self, template)
    }

    fn login_user(&self, pin: &str) -> Result<(), Pkcs11Error> {
        self.login(UserType::User, Some(&AuthPin::new(pin.to_owned())))
    }
}

/// Log in as user. Returns whether this call performed the login.
fn login(session: &impl TokenSession, pin: &str) -> Result<bool, Error> {
    if pin.is_empty() {
        // Protected authentication path readers log in on their own.
        return Ok(false);
    }
    match session.login_user(pin) {
        Ok(()) => Ok(true),
        Err(err) if return_value(&err).map_or(false, is_tolerated_login_failure) => Ok(false),
        Err(err) => Err(map_pkcs11_error(err)),
    }
}

fn return_value(err: &Pkcs11Error) -> Option<RvError> {
    match err {
        Pkcs11Error::Pkcs11(rv, ..) => Some(*rv),
        _ => None,
    }
}

fn is_tolerated_login_failure(rv: RvError) -> bool {
    rv == RvError::UserAlreadyLoggedIn
}

fn is_pin_failure(rv: RvError) -> bool {
    matches!(
        rv,
        RvError::PinIncorrect
            | RvError::PinInvalid
            | RvError::PinLenRange
            | RvError::PinExpired
            | RvError::PinLocked
            | RvError::UserNotLoggedIn
    )
}

fn map_pkcs11_error(err: Pkcs11Error) -> Error {
    match return_value(&err) {
        Some(rv) if is_pin_failure(rv) => {
            Error::AuthenticationFailed(format!("token refused the PIN ({:?})", rv))
        }
        _ => Error::Pkcs11(err),
    }
}

/// Key with the certificate's `CKA_ID`, else its label, else the only
/// private key on the token.
fn find_private_key<S: TokenSession>(
    session: &S,
    object: &TokenCertificate,
) -> Result<Option<S::Handle>, Error> {
    if !object.id.is_empty() {
        let keys = session.find_objects(&[
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Id(object.id.clone()),
        ])?;
        if let Some(key) = keys.first() {
            return Ok(Some(*key));
        }
    }
    if !object.label.is_empty() {
        let keys = session.find_objects(&[
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Label(object.label.as_bytes().to_vec()),
        ])?;
        if let Some(key) = keys.first() {
            return Ok(Some(*key));
        }
    }
    let keys = session.find_objects(&[Attribute::Class(ObjectClass::PRIVATE_KEY)])?;
    if keys.len() == 1 {
        log::debug!("Using the only private key on the token.");
        return Ok(keys.first().copied());
    }
    Ok(None)
}

fn key_family(session: &Session, key: ObjectHandle) -> Option<KeyFamily> {
    let attributes = session.get_attributes(key, &[AttributeType::KeyType]).ok()?;
    attributes.into_iter().find_map(|attribute| match attribute {
        Attribute::KeyType(KeyType::RSA) => Some(KeyFamily::Rsa),
        Attribute::KeyType(KeyType::EC) => Some(KeyFamily::Ec),
        _ => None,
    })
}

impl CredentialSigner for TokenSigner {
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, Error> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::Other("Token session is already closed".to_owned()))?;
        let mechanism = match self.family {
            KeyFamily::Rsa => Mechanism::RsaPkcs,
            KeyFamily::Ec => Mechanism::Ecdsa,
        };
        let input = raw_sign_input(self.family, digest)?;
        let raw = session
            .sign(&mechanism, self.key, &input)
            .map_err(map_pkcs11_error)?;
        raw_sign_output(self.family, raw)
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
        self.family
    }

    fn close(&mut self) -> Result<(), Error> {
        let mut result = Ok(());
        if let Some(session) = self.session.take() {
            if self.logged_in {
                match session.logout() {
                    Ok(()) | Err(Pkcs11Error::Pkcs11(RvError::UserNotLoggedIn, ..)) => {}
                    Err(err) => result = Err(Error::Pkcs11(err)),
                }
                self.logged_in = false;
            }
        }
        self.module = None;
        result
    }
}

impl Drop for TokenSigner {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("Closing token session failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Key {
        handle: u32,
        id: &'static [u8],
        label: &'static str,
    }

    #[derive(Default)]
    struct FakeSession {
        keys: Vec<Key>,
        refuse_login: bool,
        logins: Cell<u32>,
    }

    impl TokenSession for FakeSession {
        type Handle = u32;

        fn find_objects(&self, template: &[Attribute]) -> Result<Vec<u32>, Pkcs11Error> {
            let matches = |key: &Key| {
                template.iter().all(|attribute| match attribute {
                    Attribute::Id(id) => key.id == id.as_slice(),
                    Attribute::Label(label) => key.label.as_bytes() == label.as_slice(),
                    _ => true,
                })
            };
            Ok(self.keys.iter().filter(|key| matches(*key)).map(|key| key.handle).collect())
        }

        fn login_user(&self, _pin: &str) -> Result<(), Pkcs11Error> {
            self.logins.set(self.logins.get() + 1);
            if self.refuse_login {
                Err(Pkcs11Error::NotSupported)
            } else {
                Ok(())
            }
        }
    }

    fn certificate_object(id: &[u8], label: &str) -> TokenCertificate {
        TokenCertificate {
            label: label.to_owned(),
            id: id.to_vec(),
            der: vec![],
        }
    }

    fn session(keys: Vec<Key>) -> FakeSession {
        FakeSession {
            keys,
            ..FakeSession::default()
        }
    }

    #[test]
    fn key_is_found_by_id_first() {
        let session = session(vec![
            Key { handle: 1, id: b"\x01", label: "Firma" },
            Key { handle: 2, id: b"\x02", label: "Other" },
        ]);
        let object = certificate_object(b"\x02", "Firma");
        assert_eq!(find_private_key(&session, &object).unwrap(), Some(2));
    }

    #[test]
    fn key_falls_back_to_label_then_single_key() {
        let two = session(vec![
            Key { handle: 1, id: b"\x01", label: "Firma" },
            Key { handle: 2, id: b"\x02", label: "Other" },
        ]);
        let object = certificate_object(b"\x09", "Other");
        assert_eq!(find_private_key(&two, &object).unwrap(), Some(2));
        // several keys and nothing matches
        let object = certificate_object(b"\x09", "Missing");
        assert_eq!(find_private_key(&two, &object).unwrap(), None);

        let one = session(vec![Key { handle: 7, id: b"\x05", label: "Only" }]);
        assert_eq!(find_private_key(&one, &certificate_object(b"", "")).unwrap(), Some(7));
        assert_eq!(find_private_key(&session(vec![]), &object).unwrap(), None);
    }

    #[test]
    fn empty_pin_skips_login() {
        let session = session(vec![]);
        assert!(!login(&session, "").unwrap());
        assert_eq!(session.logins.get(), 0);
        assert!(login(&session, "1234").unwrap());
        assert_eq!(session.logins.get(), 1);
    }

    #[test]
    fn other_login_failures_are_not_credential_errors() {
        let session = FakeSession {
            refuse_login: true,
            ..FakeSession::default()
        };
        let err = login(&session, "1234").unwrap_err();
        assert!(matches!(err, Error::Pkcs11(_)));
        assert!(!err.is_credential_error());
    }

    #[test]
    fn already_logged_in_is_tolerated() {
        assert!(is_tolerated_login_failure(RvError::UserAlreadyLoggedIn));
        assert!(!is_tolerated_login_failure(RvError::PinIncorrect));
        assert!(!is_tolerated_login_failure(RvError::TokenNotPresent));
    }

    #[test]
    fn pin_errors_are_authentication_failures() {
        for rv in [
            RvError::PinIncorrect,
            RvError::PinInvalid,
            RvError::PinLenRange,
            RvError::PinExpired,
            RvError::PinLocked,
            RvError::UserNotLoggedIn,
        ] {
            assert!(is_pin_failure(rv), "{:?}", rv);
        }
        assert!(!is_pin_failure(RvError::DeviceError));
        assert!(!is_pin_failure(RvError::UserAlreadyLoggedIn));
        let err = map_pkcs11_error(Pkcs11Error::NotSupported);
        assert!(matches!(err, Error::Pkcs11(Pkcs11Error::NotSupported)));
    }
}
