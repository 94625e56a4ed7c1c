use crate::Error;
use lopdf::{Document, Object};

/// Follow references up to this many hops.
const MAX_REFERENCE_CHAIN: usize = 8;

pub(crate) trait PdfObjectDeref {
    /// Resolve indirect references against `doc`, non-references return themselves.
    fn deref<'a>(&'a self, doc: &'a Document) -> Result<&'a Object, Error>;
}

impl PdfObjectDeref for Object {
    fn deref<'a>(&'a self, doc: &'a Document) -> Result<&'a Object, Error> {
        let mut current = self;
        for _ in 0..MAX_REFERENCE_CHAIN {
            match *current {
                Object::Reference(oid) => {
                    current = doc.objects.get(&oid).ok_or_else(|| {
                        Error::Other(format!("PDF Error: NoSuchReference({:?})", oid))
                    })?;
                }
                _ => return Ok(current),
            }
        }
        Err(Error::Other("PDF Error: reference chain too long".to_owned()))
    }
}
