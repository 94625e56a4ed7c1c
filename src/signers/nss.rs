//! Minimal dynamic binding to the NSS shared library.
//!
//! Only the handful of calls needed to sign with a key stored in an NSS
//! database are bound. Every handle returned by NSS is wrapped in a guard
//! that destroys it on drop.

use crate::Error;
use libloading::Library;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::ffi::{c_char, c_int, c_uchar, c_uint, c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

type SecStatus = c_int;
type PrBool = c_int;

const SEC_SUCCESS: SecStatus = 0;

#[cfg(target_os = "macos")]
const DEFAULT_LIBRARIES: [&str; 1] = ["libnss3.dylib"];
#[cfg(target_os = "windows")]
const DEFAULT_LIBRARIES: [&str; 1] = ["nss3.dll"];
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const DEFAULT_LIBRARIES: [&str; 2] = ["libnss3.so", "libnss3.so.1d"];

#[repr(C)]
struct SecItem {
    item_type: c_int,
    data: *mut c_uchar,
    len: c_uint,
}

pub(crate) struct NssApi {
    init_read_write: unsafe extern "C" fn(*const c_char) -> SecStatus,
    get_default_cert_db: unsafe extern "C" fn() -> *mut c_void,
    find_cert_by_nickname: unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut c_void,
    destroy_certificate: unsafe extern "C" fn(*mut c_void),
    get_internal_key_slot: unsafe extern "C" fn() -> *mut c_void,
    free_slot: unsafe extern "C" fn(*mut c_void),
    need_login: unsafe extern "C" fn(*mut c_void) -> PrBool,
    check_user_password: unsafe extern "C" fn(*mut c_void, *const c_char) -> SecStatus,
    find_key_by_any_cert: unsafe extern "C" fn(*mut c_void, *mut c_void) -> *mut c_void,
    destroy_private_key: unsafe extern "C" fn(*mut c_void),
    signature_len: unsafe extern "C" fn(*mut c_void) -> c_int,
    sign: unsafe extern "C" fn(*mut c_void, *mut SecItem, *const SecItem) -> SecStatus,
    get_error: unsafe extern "C" fn() -> c_int,
    /// Database the process initialised NSS with.
    database: Mutex<Option<PathBuf>>,
    // Keeps the symbols above valid.
    _library: Library,
}

static NSS: OnceCell<NssApi> = OnceCell::new();

unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T, Error> {
    library.get::<T>(name).map(|symbol| *symbol).map_err(|err| {
        Error::BackendUnavailable(format!(
            "NSS symbol `{}` missing: {}",
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name)),
            err
        ))
    })
}

impl NssApi {
    /// Load NSS once per process. `library` overrides the default name.
    pub fn get(library: Option<&Path>) -> Result<&'static NssApi, Error> {
        NSS.get_or_try_init(|| {
            let candidates: Vec<PathBuf> = match library {
                Some(path) => vec![path.to_path_buf()],
                None => DEFAULT_LIBRARIES.iter().map(PathBuf::from).collect(),
            };
            let mut last_error = None;
            for candidate in candidates {
                // Loading runs the library's initialisers, NSS has none with side effects.
                match unsafe { Library::new(&candidate) } {
                    Ok(loaded) => return unsafe { Self::bind(loaded) },
                    Err(err) => last_error = Some(format!("{}: {}", candidate.display(), err)),
                }
            }
            Err(Error::BackendUnavailable(format!(
                "Can not load the NSS library ({})",
                last_error.unwrap_or_default()
            )))
        })
    }

    unsafe fn bind(library: Library) -> Result<NssApi, Error> {
        Ok(NssApi {
            init_read_write: symbol(&library, b"NSS_InitReadWrite\0")?,
            get_default_cert_db: symbol(&library, b"CERT_GetDefaultCertDB\0")?,
            find_cert_by_nickname: symbol(&library, b"CERT_FindCertByNickname\0")?,
            destroy_certificate: symbol(&library, b"CERT_DestroyCertificate\0")?,
            get_internal_key_slot: symbol(&library, b"PK11_GetInternalKeySlot\0")?,
            free_slot: symbol(&library, b"PK11_FreeSlot\0")?,
            need_login: symbol(&library, b"PK11_NeedLogin\0")?,
            check_user_password: symbol(&library, b"PK11_CheckUserPassword\0")?,
            find_key_by_any_cert: symbol(&library, b"PK11_FindKeyByAnyCert\0")?,
            destroy_private_key: symbol(&library, b"SECKEY_DestroyPrivateKey\0")?,
            signature_len: symbol(&library, b"PK11_SignatureLen\0")?,
            sign: symbol(&library, b"PK11_Sign\0")?,
            get_error: symbol(&library, b"PORT_GetError\0")?,
            database: Mutex::new(None),
            _library: library,
        })
    }

    /// Open `sql:<dir>` read/write. NSS supports a single database per
    /// process, asking for a different one afterwards is an error.
    pub fn initialize(&self, database_dir: &Path) -> Result<(), Error> {
        let mut database = self.database.lock();
        match database.as_deref() {
            Some(current) if current == database_dir => return Ok(()),
            Some(current) => {
                return Err(Error::BackendUnavailable(format!(
                    "NSS is already bound to `{}`",
                    current.display()
                )))
            }
            None => {}
        }
        let config = c_string(&format!("sql:{}", database_dir.display()))?;
        let status = unsafe { (self.init_read_write)(config.as_ptr()) };
        if status != SEC_SUCCESS {
            return Err(Error::BackendUnavailable(format!(
                "NSS_InitReadWrite failed for `{}` (NSS error {})",
                database_dir.display(),
                self.last_error()
            )));
        }
        *database = Some(database_dir.to_path_buf());
        Ok(())
    }

    pub fn last_error(&self) -> c_int {
        unsafe { (self.get_error)() }
    }

    pub fn internal_key_slot(&'static self) -> Result<SlotHandle, Error> {
        let slot = unsafe { (self.get_internal_key_slot)() };
        NonNull::new(slot)
            .map(|ptr| SlotHandle { api: self, ptr })
            .ok_or_else(|| Error::BackendUnavailable("NSS has no internal key slot".to_owned()))
    }

    pub fn find_certificate(&'static self, nickname: &str) -> Result<Option<CertificateHandle>, Error> {
        let nickname = c_string(nickname)?;
        let cert = unsafe {
            let db = (self.get_default_cert_db)();
            (self.find_cert_by_nickname)(db, nickname.as_ptr())
        };
        Ok(NonNull::new(cert).map(|ptr| CertificateHandle { api: self, ptr }))
    }
}

pub(crate) struct SlotHandle {
    api: &'static NssApi,
    ptr: NonNull<c_void>,
}

impl SlotHandle {
    pub fn needs_login(&self) -> bool {
        unsafe { (self.api.need_login)(self.ptr.as_ptr()) != 0 }
    }

    /// Returns false when NSS rejects the password.
    pub fn check_password(&self, password: &str) -> Result<bool, Error> {
        let password = c_string(password)?;
        let status = unsafe { (self.api.check_user_password)(self.ptr.as_ptr(), password.as_ptr()) };
        Ok(status == SEC_SUCCESS)
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        unsafe { (self.api.free_slot)(self.ptr.as_ptr()) }
    }
}

pub(crate) struct CertificateHandle {
    api: &'static NssApi,
    ptr: NonNull<c_void>,
}

impl CertificateHandle {
    pub fn private_key(&self) -> Option<PrivateKeyHandle> {
        let key = unsafe { (self.api.find_key_by_any_cert)(self.ptr.as_ptr(), ptr::null_mut()) };
        NonNull::new(key).map(|ptr| PrivateKeyHandle { api: self.api, ptr })
    }
}

impl Drop for CertificateHandle {
    fn drop(&mut self) {
        unsafe { (self.api.destroy_certificate)(self.ptr.as_ptr()) }
    }
}

pub(crate) struct PrivateKeyHandle {
    api: &'static NssApi,
    ptr: NonNull<c_void>,
}

impl PrivateKeyHandle {
    /// Raw sign: `CKM_RSA_PKCS` for RSA keys, `CKM_ECDSA` for EC keys.
    pub fn sign(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let capacity = unsafe { (self.api.signature_len)(self.ptr.as_ptr()) };
        if capacity <= 0 {
            return Err(Error::Other(format!(
                "NSS reports no signature length (NSS error {})",
                self.api.last_error()
            )));
        }
        let mut signature = vec![0u8; usize::try_from(capacity)?];
        let mut output = SecItem {
            item_type: 0,
            data: signature.as_mut_ptr(),
            len: c_uint::try_from(signature.len())?,
        };
        let data = SecItem {
            item_type: 0,
            data: input.as_ptr() as *mut c_uchar,
            len: c_uint::try_from(input.len())?,
        };
        let status = unsafe { (self.api.sign)(self.ptr.as_ptr(), &mut output, &data) };
        if status != SEC_SUCCESS {
            return Err(Error::Other(format!(
                "PK11_Sign failed (NSS error {})",
                self.api.last_error()
            )));
        }
        signature.truncate(usize::try_from(output.len)?);
        Ok(signature)
    }
}

impl Drop for PrivateKeyHandle {
    fn drop(&mut self) {
        unsafe { (self.api.destroy_private_key)(self.ptr.as_ptr()) }
    }
}

fn c_string(value: &str) -> Result<CString, Error> {
    CString::new(value).map_err(|_| Error::Other("Value contains a NUL byte".to_owned()))
}
