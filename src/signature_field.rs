use crate::acro_form::AcroForm;
use crate::error::Error;
use crate::lopdf_utils::text_string;
use crate::rectangle::Rectangle;
use crate::{AppearanceForms, PDFSigningDocument};
use lopdf::{Dictionary, Object, ObjectId};

/// Annotation flags `Print` (4) and `Locked` (128).
const WIDGET_FLAGS: i64 = 132;
/// `SignaturesExist` (1) and `AppendOnly` (2).
const SIG_FLAGS: i64 = 3;

/// Where the signature widget goes and what it shows.
#[derive(Debug, Clone)]
pub(crate) struct FieldPlacement {
    pub page_id: ObjectId,
    pub rect: Rectangle,
    /// PNG of the rendered stamp. `None` for invisible signatures.
    pub appearance_png: Option<Vec<u8>>,
}

impl PDFSigningDocument {
    /// First free `Signature<n>` name in the document.
    pub(crate) fn next_signature_field_name(&self) -> Result<String, Error> {
        let forms = AcroForm::load_all_forms(self.raw_document.get_prev_documents())?;
        let existing: Vec<&str> = forms
            .iter()
            .filter_map(|form| form.get_partial_field_name())
            .collect();
        let signature_count = forms.iter().filter(|form| form.is_signature()).count();
        let mut index = signature_count + 1;
        loop {
            let name = format!("Signature{}", index);
            if !existing.contains(&name.as_str()) {
                return Ok(name);
            }
            index += 1;
        }
    }

    /// Add a merged signature field and widget pointing at `signature_value_id`.
    /// Returns the ObjectId of the field.
    pub(crate) fn add_signature_field(
        &mut self,
        signature_value_id: ObjectId,
        placement: &FieldPlacement,
    ) -> Result<ObjectId, Error> {
        use lopdf::Object::Reference;

        let field_name = self.next_signature_field_name()?;
        let appearance_id = match &placement.appearance_png {
            Some(png) => self
                .raw_document
                .new_document
                .add_stamp_form(png, &placement.rect)?,
            None => self.raw_document.new_document.add_blank_form(),
        };

        let field = Dictionary::from_iter(vec![
            ("FT", Object::Name(b"Sig".to_vec())),
            ("Type", Object::Name(b"Annot".to_vec())),
            ("Subtype", Object::Name(b"Widget".to_vec())),
            ("T", text_string(&field_name)),
            ("F", Object::Integer(WIDGET_FLAGS)),
            ("P", Reference(placement.page_id)),
            ("Rect", placement.rect.to_object()),
            (
                "AP",
                Object::Dictionary(Dictionary::from_iter(vec![("N", Reference(appearance_id))])),
            ),
            ("V", Reference(signature_value_id)),
        ]);
        let field_id = self.raw_document.new_document.add_object(field);
        log::debug!(
            "Added signature field `{}` as ({},{}).",
            field_name,
            field_id.0,
            field_id.1
        );

        self.add_annotation_to_page(placement.page_id, field_id)?;
        self.add_field_to_acro_form(field_id)?;
        Ok(field_id)
    }

    fn root_id(&self) -> Result<ObjectId, Error> {
        Ok(self
            .raw_document
            .get_prev_documents()
            .trailer
            .get(b"Root")?
            .as_reference()?)
    }

    /// Append to the page `Annots`, which may be missing, inline or a reference.
    fn add_annotation_to_page(&mut self, page_id: ObjectId, annot_id: ObjectId) -> Result<(), Error> {
        self.raw_document.opt_clone_object_to_new_document(page_id)?;
        let annots = self
            .raw_document
            .new_document
            .get_object(page_id)?
            .as_dict()?
            .get(b"Annots")
            .ok()
            .cloned();

        match annots {
            Some(Object::Reference(annots_id)) => {
                self.raw_document
                    .opt_clone_object_to_new_document(annots_id)?;
                self.raw_document
                    .new_document
                    .get_object_mut(annots_id)?
                    .as_array_mut()?
                    .push(Object::Reference(annot_id));
            }
            Some(Object::Array(mut list)) => {
                list.push(Object::Reference(annot_id));
                self.raw_document
                    .new_document
                    .get_object_mut(page_id)?
                    .as_dict_mut()?
                    .set("Annots", list);
            }
            _ => {
                self.raw_document
                    .new_document
                    .get_object_mut(page_id)?
                    .as_dict_mut()?
                    .set("Annots", vec![Object::Reference(annot_id)]);
            }
        }
        Ok(())
    }

    /// Register the field in `Root->AcroForm->Fields` and raise `SigFlags`.
    fn add_field_to_acro_form(&mut self, field_id: ObjectId) -> Result<(), Error> {
        let root_id = self.root_id()?;
        self.raw_document.opt_clone_object_to_new_document(root_id)?;
        let acro_form = self
            .raw_document
            .new_document
            .get_object(root_id)?
            .as_dict()?
            .get(b"AcroForm")
            .ok()
            .cloned();

        let (mut form, form_id) = match acro_form {
            Some(Object::Reference(form_id)) => {
                self.raw_document.opt_clone_object_to_new_document(form_id)?;
                let form = self
                    .raw_document
                    .new_document
                    .get_object(form_id)?
                    .as_dict()?
                    .clone();
                (form, Some(form_id))
            }
            Some(Object::Dictionary(form)) => (form, None),
            _ => (Dictionary::new(), None),
        };

        match form.get(b"Fields").ok().cloned() {
            Some(Object::Reference(fields_id)) => {
                self.raw_document
                    .opt_clone_object_to_new_document(fields_id)?;
                self.raw_document
                    .new_document
                    .get_object_mut(fields_id)?
                    .as_array_mut()?
                    .push(Object::Reference(field_id));
            }
            Some(Object::Array(mut fields)) => {
                fields.push(Object::Reference(field_id));
                form.set("Fields", fields);
            }
            _ => form.set("Fields", vec![Object::Reference(field_id)]),
        }
        let sig_flags = form
            .get(b"SigFlags")
            .and_then(Object::as_i64)
            .unwrap_or(0);
        form.set("SigFlags", Object::Integer(sig_flags | SIG_FLAGS));

        match form_id {
            Some(form_id) => {
                *self.raw_document.new_document.get_object_mut(form_id)? =
                    Object::Dictionary(form);
            }
            None => {
                self.raw_document
                    .new_document
                    .get_object_mut(root_id)?
                    .as_dict_mut()?
                    .set("AcroForm", form);
            }
        }
        Ok(())
    }

    /// Point `Root->Perms->DocMDP` at a certification signature.
    pub(crate) fn add_doc_mdp_permissions(&mut self, signature_value_id: ObjectId) -> Result<(), Error> {
        let root_id = self.root_id()?;
        self.raw_document.opt_clone_object_to_new_document(root_id)?;
        let perms = self
            .raw_document
            .new_document
            .get_object(root_id)?
            .as_dict()?
            .get(b"Perms")
            .ok()
            .cloned();

        match perms {
            Some(Object::Reference(perms_id)) => {
                self.raw_document.opt_clone_object_to_new_document(perms_id)?;
                self.raw_document
                    .new_document
                    .get_object_mut(perms_id)?
                    .as_dict_mut()?
                    .set("DocMDP", Object::Reference(signature_value_id));
            }
            Some(Object::Dictionary(mut perms)) => {
                log::info!("Document already has `Perms` field.");
                perms.set("DocMDP", Object::Reference(signature_value_id));
                self.raw_document
                    .new_document
                    .get_object_mut(root_id)?
                    .as_dict_mut()?
                    .set("Perms", perms);
            }
            _ => {
                self.raw_document
                    .new_document
                    .get_object_mut(root_id)?
                    .as_dict_mut()?
                    .set(
                        "Perms",
                        Dictionary::from_iter(vec![(
                            "DocMDP",
                            Object::Reference(signature_value_id),
                        )]),
                    );
            }
        }
        Ok(())
    }
}
