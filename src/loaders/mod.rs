//! Backend loaders turn backend-native records into [`Certificate`]s.
//!
//! A loader never fails the whole discovery because of one broken entry:
//! unreadable files, broken modules and missing databases are logged and
//! skipped.

mod pfx;
pub(crate) mod software_store;
pub(crate) mod token;
pub(crate) mod trust_database;

use crate::{Certificate, CertificateSource, Error};

pub use software_store::SoftwareStoreLoader;
pub use token::TokenLoader;
pub use trust_database::{CertutilDatabase, TrustDatabaseLoader, TrustEntry, TrustStoreListing};

pub trait CertificateLoader {
    fn source(&self) -> CertificateSource;

    /// Enumerate every certificate this backend can currently see.
    fn load(&self) -> Result<Vec<Certificate>, Error>;
}
