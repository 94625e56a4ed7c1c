use crate::byte_range::{set_content, set_next_byte_range};
use crate::error::Error;
use crate::signers::{CmsKey, CredentialSigner};
use crate::PDFSigningDocument;
use cryptographic_message_syntax::{Bytes, Oid, SignedDataBuilder, SignerBuilder};

impl PDFSigningDocument {
    /// Write the pending update, then sign everything but the `Contents`
    /// hole with `signer`. Any later change to the document breaks the
    /// signature, so this is the last step.
    pub(crate) fn digitally_sign_document(
        &mut self,
        signer: &dyn CredentialSigner,
    ) -> Result<Vec<u8>, Error> {
        // Convert pdf document to binary data.
        let mut pdf_file_data: Vec<u8> = Vec::new();
        self.write_document(&mut pdf_file_data)?;

        let (byte_range, pdf_file_data) = set_next_byte_range(pdf_file_data)?;
        log::trace!("Signing byte range {:?}.", byte_range.0);

        // create new vec without the content part
        let signed_content = byte_range.signed_data(&pdf_file_data)?;

        // Only the digest of the signed attributes reaches the backend.
        let cms_key = CmsKey::new(signer);
        let mut builder = SignedDataBuilder::default()
            .content_external(signed_content)
            .content_type(Oid(Bytes::copy_from_slice(
                cryptographic_message_syntax::asn1::rfc5652::OID_ID_DATA.as_ref(),
            )))
            .signer(SignerBuilder::new(
                &cms_key,
                signer.x509_certificate().clone(),
            ))
            .certificate(signer.x509_certificate().clone());
        for issuer in signer.chain() {
            builder = builder.certificate(issuer.clone());
        }
        let signature = builder
            .build_der()
            .map_err(|err| cms_key.take_failure().unwrap_or(Error::Cms(err)))?;
        log::debug!("CMS signature is {} bytes.", signature.len());

        // Write signature to file
        set_content(pdf_file_data, &byte_range, &signature)
    }
}
