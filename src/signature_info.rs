use crate::byte_range::{CONTENTS_CAPACITY, PLACEHOLDER_BYTE_RANGE};
use crate::lopdf_utils::{format_pdf_date, text_string};
use crate::signing_request::SignatureKind;
use crate::PDFSigningDocument;
use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Object, ObjectId, StringFormat};

/// DocMDP permission level: form filling and further signatures allowed.
pub(crate) const DOC_MDP_FORM_FILLING: i64 = 2;

/// What ends up in the signature value dictionary besides the signature itself.
#[derive(Debug, Clone)]
pub(crate) struct SignatureMetadata {
    pub signer_name: String,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub signed_at: DateTime<Utc>,
    pub kind: SignatureKind,
}

impl SignatureMetadata {
    /// Build the `V` dictionary with a placeholder `ByteRange` and an empty
    /// `Contents` string. Both are filled in after the file is written.
    pub(crate) fn to_value_dictionary(&self) -> Dictionary {
        let mut v_dictionary = Dictionary::new();
        v_dictionary.set("Type", Object::Name(b"Sig".to_vec()));
        v_dictionary.set("Filter", Object::Name(b"Adobe.PPKLite".to_vec()));
        v_dictionary.set("SubFilter", Object::Name(b"adbe.pkcs7.detached".to_vec()));
        // The order of `ByteRange` and `Contents` is important.
        // They should not be moved or switched in ordering.
        v_dictionary.set(
            "ByteRange",
            Object::Array(PLACEHOLDER_BYTE_RANGE.iter().map(|n| Object::Integer(*n)).collect()),
        );
        v_dictionary.set(
            "Contents",
            Object::String(vec![0u8; CONTENTS_CAPACITY], StringFormat::Hexadecimal),
        );
        v_dictionary.set(
            "M",
            Object::string_literal(format_pdf_date(&self.signed_at)),
        );
        v_dictionary.set("Name", text_string(&self.signer_name));
        if let Some(reason) = non_empty(&self.reason) {
            v_dictionary.set("Reason", text_string(reason));
        }
        if let Some(location) = non_empty(&self.location) {
            v_dictionary.set("Location", text_string(location));
        }
        if let Some(contact_info) = non_empty(&self.contact_info) {
            v_dictionary.set("ContactInfo", text_string(contact_info));
        }
        if self.kind == SignatureKind::Certification {
            v_dictionary.set(
                "Reference",
                Object::Array(vec![Object::Dictionary(Self::doc_mdp_reference())]),
            );
        }
        v_dictionary.set("Prop_Build", Object::Dictionary(Self::build_properties()));
        v_dictionary
    }

    fn doc_mdp_reference() -> Dictionary {
        Dictionary::from_iter(vec![
            ("Type", Object::Name(b"SigRef".to_vec())),
            ("TransformMethod", Object::Name(b"DocMDP".to_vec())),
            ("DigestMethod", Object::Name(b"SHA256".to_vec())),
            (
                "TransformParams",
                Object::Dictionary(Dictionary::from_iter(vec![
                    ("Type", Object::Name(b"TransformParams".to_vec())),
                    ("P", Object::Integer(DOC_MDP_FORM_FILLING)),
                    ("V", Object::Name(b"1.2".to_vec())),
                ])),
            ),
        ])
    }

    /// `Prop_Build`: which software produced the signature.
    fn build_properties() -> Dictionary {
        Dictionary::from_iter(vec![
            (
                "Filter",
                Object::Dictionary(Dictionary::from_iter(vec![(
                    "Name",
                    Object::Name(b"Adobe.PPKLite".to_vec()),
                )])),
            ),
            (
                "App",
                Object::Dictionary(Dictionary::from_iter(vec![
                    ("Name", Object::Name(env!("CARGO_PKG_NAME").as_bytes().to_vec())),
                    ("OS", Object::Array(vec![Object::Name(std::env::consts::OS.as_bytes().to_vec())])),
                    // Semver of this crate
                    ("REx", Object::string_literal(env!("CARGO_PKG_VERSION"))),
                ])),
            ),
        ])
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl PDFSigningDocument {
    /// Add the signature value dictionary to the incremental update.
    pub(crate) fn add_signature_value(&mut self, metadata: &SignatureMetadata) -> ObjectId {
        self.raw_document
            .new_document
            .add_object(Object::Dictionary(metadata.to_value_dictionary()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metadata(kind: SignatureKind) -> SignatureMetadata {
        SignatureMetadata {
            signer_name: "Ana Pérez".to_owned(),
            reason: Some("Approved".to_owned()),
            location: Some("  ".to_owned()),
            contact_info: None,
            signed_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            kind,
        }
    }

    #[test]
    fn byte_range_comes_right_before_contents() {
        let dict = metadata(SignatureKind::Approval).to_value_dictionary();
        let keys: Vec<&[u8]> = dict.iter().map(|(key, _)| key.as_slice()).collect();
        let byte_range = keys.iter().position(|k| *k == b"ByteRange").unwrap();
        assert_eq!(keys[byte_range + 1], b"Contents");
    }

    #[test]
    fn approval_has_no_doc_mdp_reference() {
        let dict = metadata(SignatureKind::Approval).to_value_dictionary();
        assert!(!dict.has(b"Reference"));
        assert_eq!(
            dict.get(b"M").unwrap().as_str().unwrap(),
            b"D:20240301123000+00'00'"
        );
        // blank location is left out
        assert!(!dict.has(b"Location"));
        assert!(dict.has(b"Reason"));
        assert!(!dict.has(b"ContactInfo"));
    }

    #[test]
    fn certification_carries_doc_mdp_permission() {
        let dict = metadata(SignatureKind::Certification).to_value_dictionary();
        let reference = dict.get(b"Reference").unwrap().as_array().unwrap();
        let sig_ref = reference[0].as_dict().unwrap();
        assert_eq!(
            sig_ref.get(b"TransformMethod").unwrap().as_name_str().unwrap(),
            "DocMDP"
        );
        let params = sig_ref.get(b"TransformParams").unwrap().as_dict().unwrap();
        assert_eq!(params.get(b"P").unwrap().as_i64().unwrap(), DOC_MDP_FORM_FILLING);
    }
}
