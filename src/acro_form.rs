//! `AcroForm` is the section of a pdf used to store info about forms.
//!

use crate::PdfObjectDeref;
use crate::{lopdf_utils, Error};
use lopdf::{Dictionary, Document, Object};

/// Guard against reference cycles in broken field trees.
const MAX_FIELD_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub(crate) struct AcroForm {
    partial_field_name: Option<String>,
    form_component: FormComponent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub(crate) enum FormComponent {
    Button,
    Text,
    Choice,
    /// Signature field, not signed.
    EmptySignature,
    /// Signature field, already signed.
    SignedSignature(SignatureValue),
    /// Unknown fields have no state
    Unknown,
}

/// The `V` dictionary of a signed signature field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignatureValue {
    pub filter: String,
    pub sub_filter: Option<String>,
    pub contents: Vec<u8>,
    pub byte_range: Vec<(u64, u64)>,
    /// The name of the person or authority signing the document.
    /// This value should be used only when it is not possible to extract the
    /// name from the signature.
    pub name: Option<String>,
    /// Raw `M` date string.
    pub signing_time: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    /// `P` of a `DocMDP` transform, if this is a certification signature.
    pub doc_mdp_permission: Option<i64>,
}

#[derive(Debug, Clone, Default)]
struct InheritableFields {
    /// Technically an enum.
    /// Allowed values:
    /// - `Btn` (Button)
    /// - `Tx` (Text)
    /// - `Ch` (Choice)
    /// - `Sig` (Signature) (PDF 1.3)
    ft: Option<Vec<u8>>,
    /// Fully qualified name of the parent.
    name_prefix: Option<String>,
}

impl AcroForm {
    pub(crate) fn load_all_forms(raw_doc: &Document) -> Result<Vec<Self>, Error> {
        // Structure of pdf:
        // - Root (dictionary)
        //   - AcroForm (dictionary)
        //     - Fields (array)
        //       - <references>
        //       - ...
        //   - Pages
        //   - ...
        let root = raw_doc.trailer.get(b"Root")?.deref(raw_doc)?.as_dict()?;

        if !root.has(b"AcroForm") {
            log::debug!("Document does not contain any forms.");
            return Ok(vec![]);
        }
        let acro_form_dict = root.get(b"AcroForm")?.deref(raw_doc)?.as_dict()?;
        if !acro_form_dict.has(b"Fields") {
            return Ok(vec![]);
        }
        let fields_list = acro_form_dict.get(b"Fields")?.deref(raw_doc)?.as_array()?;

        // Fields can be a hierarchy, so need to be parsed this way.
        let mut form_fields = vec![];
        Self::load_field_list(
            raw_doc,
            fields_list,
            InheritableFields::default(),
            0,
            &mut form_fields,
        )?;
        Ok(form_fields)
    }

    pub(crate) fn get_partial_field_name(&self) -> Option<&str> {
        self.partial_field_name.as_deref()
    }

    pub(crate) fn get_form_component(&self) -> &FormComponent {
        &self.form_component
    }

    pub(crate) fn is_signature(&self) -> bool {
        matches!(
            self.form_component,
            FormComponent::EmptySignature | FormComponent::SignedSignature(_)
        )
    }

    /// Parse a list if referenced in the hierarchy of `Root->AcroForm->Fields`.
    ///
    /// There are properties that can be inherited from the parents.
    fn load_field_list(
        raw_doc: &Document,
        list: &[Object],
        inherit: InheritableFields,
        depth: usize,
        form_fields: &mut Vec<Self>,
    ) -> Result<(), Error> {
        if depth > MAX_FIELD_DEPTH {
            log::warn!("Form field tree is too deep, ignoring the rest.");
            return Ok(());
        }
        for field in list {
            let field_dict = match field.deref(raw_doc)?.as_dict() {
                Ok(dict) => dict,
                Err(_) => {
                    log::warn!("Form field is not a dictionary, skipped.");
                    continue;
                }
            };

            let partial = lopdf_utils::as_option_text_string(field_dict.get(b"T").ok())?;
            let full_name = match (&inherit.name_prefix, partial) {
                (Some(prefix), Some(partial)) => Some(format!("{}.{}", prefix, partial)),
                (None, partial) => partial,
                (prefix, None) => prefix.clone(),
            };
            let ft = match field_dict.get(b"FT") {
                Ok(ft) => Some(ft.as_name()?.to_vec()),
                Err(_) => inherit.ft.clone(),
            };

            // Non-terminal fields only pass their values on to the kids.
            if let Some(kids) = Self::field_kids(raw_doc, field_dict)? {
                let inherit = InheritableFields {
                    ft: ft.clone(),
                    name_prefix: full_name.clone(),
                };
                Self::load_field_list(raw_doc, kids, inherit, depth + 1, form_fields)?;
                continue;
            }

            let Some(ft) = ft else {
                continue;
            };
            let component = match ft.as_slice() {
                b"Btn" => FormComponent::Button,
                b"Tx" => FormComponent::Text,
                b"Ch" => FormComponent::Choice,
                b"Sig" => Self::load_signature(raw_doc, field_dict)?,
                unknown_type => {
                    log::warn!(
                        "Found an unknown `FT`: {}",
                        String::from_utf8_lossy(unknown_type)
                    );
                    FormComponent::Unknown
                }
            };
            form_fields.push(AcroForm {
                partial_field_name: full_name,
                form_component: component,
            });
        }
        Ok(())
    }

    /// `Kids` that are fields themselves. Widget-only kids (no `T`) belong
    /// to a terminal field and are not descended into.
    fn field_kids<'a>(
        raw_doc: &'a Document,
        field_dict: &'a Dictionary,
    ) -> Result<Option<&'a Vec<Object>>, Error> {
        if !field_dict.has(b"Kids") {
            return Ok(None);
        }
        let kids = field_dict.get(b"Kids")?.deref(raw_doc)?.as_array()?;
        let has_field_kids = kids.iter().any(|kid| {
            kid.deref(raw_doc)
                .and_then(|kid| Ok(kid.as_dict()?.has(b"T")))
                .unwrap_or(false)
        });
        Ok(has_field_kids.then_some(kids))
    }

    fn load_signature(raw_doc: &Document, field_dict: &Dictionary) -> Result<FormComponent, Error> {
        // Seed values and locks are not evaluated.
        if field_dict.has(b"SV") {
            log::debug!("`SV` is not supported for signatures.");
        }
        if !field_dict.has(b"V") {
            return Ok(FormComponent::EmptySignature);
        }
        let sign_value_dict = match field_dict.get(b"V")?.deref(raw_doc)?.as_dict() {
            Ok(dict) => dict,
            Err(_) => return Ok(FormComponent::EmptySignature),
        };
        if !(sign_value_dict.has(b"Filter") || sign_value_dict.has(b"Contents")) {
            return Ok(FormComponent::EmptySignature);
        }
        let get = |key: &[u8]| sign_value_dict.get(key).ok();
        Ok(FormComponent::SignedSignature(SignatureValue {
            filter: lopdf_utils::as_option_name(get(b"Filter"))?.unwrap_or_default(),
            sub_filter: lopdf_utils::as_option_name(get(b"SubFilter"))?,
            contents: lopdf_utils::as_byte_string(get(b"Contents"), "Contents")?,
            byte_range: lopdf_utils::as_byte_range(get(b"ByteRange"))?,
            name: lopdf_utils::as_option_text_string(get(b"Name"))?,
            signing_time: lopdf_utils::as_option_text_string(get(b"M"))?,
            reason: lopdf_utils::as_option_text_string(get(b"Reason"))?,
            location: lopdf_utils::as_option_text_string(get(b"Location"))?,
            contact_info: lopdf_utils::as_option_text_string(get(b"ContactInfo"))?,
            doc_mdp_permission: Self::doc_mdp_permission(raw_doc, sign_value_dict),
        }))
    }

    fn doc_mdp_permission(raw_doc: &Document, sign_value_dict: &Dictionary) -> Option<i64> {
        let references = sign_value_dict
            .get(b"Reference")
            .ok()?
            .deref(raw_doc)
            .ok()?
            .as_array()
            .ok()?;
        references.iter().find_map(|reference| {
            let reference = reference.deref(raw_doc).ok()?.as_dict().ok()?;
            if reference.get(b"TransformMethod").ok()?.as_name().ok()? != b"DocMDP" {
                return None;
            }
            let params = reference
                .get(b"TransformParams")
                .ok()
                .and_then(|params| params.deref(raw_doc).ok())
                .and_then(|params| params.as_dict().ok());
            // `P` defaults to 2
            Some(
                params
                    .and_then(|params| params.get(b"P").ok())
                    .and_then(|p| p.as_i64().ok())
                    .unwrap_or(2),
            )
        })
    }
}
