//! Digitally sign PDF documents with certificates from PKCS#12 bundles,
//! PKCS#11 tokens and NSS databases, and verify the signatures they carry.
//!
//! [`SigningService`] is the entry point: it finds a certificate through the
//! [`CertificateAggregator`], applies a [`SignatureProfile`], renders the
//! optional stamp and appends the signature as an incremental update.

mod acro_form;
mod appearance_form;
mod byte_range;
mod digitally_sign;
mod image_xobject;
mod lopdf_utils;
mod pdf_object;
mod rectangle;
mod signature_field;
mod signature_info;
#[cfg(test)]
mod test_support;

pub mod aggregator;
pub mod appearance;
pub mod certificate;
pub mod config;
pub mod error;
pub mod loaders;
pub mod profile;
pub mod service;
pub mod signers;
pub mod signing_request;
pub mod verification;

use appearance_form::AppearanceForms;
use lopdf::{Document, IncrementalDocument, ObjectId};
use pdf_object::PdfObjectDeref;
use signature_field::FieldPlacement;
use signature_info::SignatureMetadata;
use signing_request::SignatureKind;
use std::io::{Read, Write};

pub use aggregator::{CertificateAggregator, CertificateFilter};
pub use appearance::{AppearanceRenderer, Stamp};
pub use byte_range::ByteRange;
pub use certificate::{BackendHint, Certificate, CertificateSource, KeyUsage};
pub use config::{Settings, SettingsStore};
pub use error::{Error, SigningStage};
pub use lopdf;
pub use profile::{
    AppearanceOptions, LogoPosition, PagePolicy, ProfileStore, Rect, SignaturePosition,
    SignatureProfile, Visibility,
};
pub use service::SigningService;
pub use signers::{open_signer, CredentialSigner};
pub use signing_request::{signed_output_path, PositionOverride, SigningRequest};
pub use verification::{VerificationResult, Verifier};

/// The whole PDF document. Changes are collected in an incremental update,
/// the original bytes are written back unchanged.
#[derive(Debug, Clone)]
pub struct PDFSigningDocument {
    raw_document: IncrementalDocument,
    file_name: String,
}

impl PDFSigningDocument {
    pub fn new(raw_document: IncrementalDocument, file_name: String) -> Self {
        PDFSigningDocument {
            raw_document,
            file_name,
        }
    }

    pub fn read_from<R: Read>(mut reader: R, file_name: String) -> Result<Self, Error> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        let raw_document = IncrementalDocument::load_from(buffer.as_slice())?;
        Ok(Self::new(raw_document, file_name))
    }

    pub fn get_file_name(&self) -> &str {
        &self.file_name
    }

    /// The document as it was read, without pending changes.
    pub fn get_prev_document_ref(&self) -> &Document {
        self.raw_document.get_prev_documents()
    }

    pub fn page_count(&self) -> u32 {
        self.get_prev_document_ref().get_pages().len() as u32
    }

    /// ObjectId of a 1-based page.
    pub fn page_id(&self, page_number: u32) -> Result<ObjectId, Error> {
        self.get_prev_document_ref()
            .get_pages()
            .get(&page_number)
            .copied()
            .ok_or_else(|| {
                Error::InvalidPosition(format!(
                    "page {} does not exist in `{}`",
                    page_number,
                    self.get_file_name()
                ))
            })
    }

    /// True if any signature field already holds a signature.
    pub fn has_signatures(&self) -> Result<bool, Error> {
        Ok(
            acro_form::AcroForm::load_all_forms(self.get_prev_document_ref())?
                .iter()
                .any(|form| {
                    matches!(
                        form.get_form_component(),
                        acro_form::FormComponent::SignedSignature(_)
                    )
                }),
        )
    }

    pub fn write_document<W: Write>(&mut self, target: &mut W) -> Result<(), Error> {
        self.raw_document.save_to(target)?;
        Ok(())
    }

    /// Add the signature field and value, then sign the resulting file.
    /// Returns the complete signed file.
    pub(crate) fn sign_document(
        &mut self,
        signer: &dyn CredentialSigner,
        metadata: &SignatureMetadata,
        placement: &FieldPlacement,
    ) -> Result<Vec<u8>, Error> {
        let signature_value_id = self.add_signature_value(metadata);
        self.add_signature_field(signature_value_id, placement)?;
        if metadata.kind == SignatureKind::Certification {
            self.add_doc_mdp_permissions(signature_value_id)?;
        }
        log::info!(
            "Signing `{}` as `{}` ({:?}).",
            self.file_name,
            metadata.signer_name,
            metadata.kind
        );
        self.digitally_sign_document(signer)
    }
}
