//! Signing and verification entry points.

use crate::aggregator::{CertificateAggregator, CertificateFilter};
use crate::appearance::AppearanceRenderer;
use crate::config::Settings;
use crate::profile::{ProfileStore, SignatureProfile};
use crate::rectangle::Rectangle;
use crate::signature_field::FieldPlacement;
use crate::signature_info::SignatureMetadata;
use crate::signers::{open_signer, CredentialSigner};
use crate::signing_request::{SignatureKind, SigningRequest};
use crate::verification::{VerificationResult, Verifier};
use crate::{Certificate, Error, PDFSigningDocument, SigningStage};
use chrono::{Local, Utc};
use std::fs;
use std::path::{Path, PathBuf};

pub struct SigningService {
    settings: Settings,
    aggregator: CertificateAggregator,
    profiles: ProfileStore,
    renderer: AppearanceRenderer,
    verifier: Verifier,
}

impl SigningService {
    /// Wire the default loaders, renderer and trust anchors from `settings`.
    pub fn new(settings: Settings, profiles: ProfileStore) -> Result<Self, Error> {
        let aggregator = CertificateAggregator::from_settings(&settings);
        let renderer = AppearanceRenderer::from_settings(&settings)?;
        let verifier = Verifier::from_settings(&settings);
        log::debug!("Verifier trusts {} certificate(s).", verifier.anchor_count());
        Ok(Self::with_parts(settings, aggregator, profiles, renderer, verifier))
    }

    pub fn with_parts(
        settings: Settings,
        aggregator: CertificateAggregator,
        profiles: ProfileStore,
        renderer: AppearanceRenderer,
        verifier: Verifier,
    ) -> Self {
        SigningService {
            settings,
            aggregator,
            profiles,
            renderer,
            verifier,
        }
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn certificates(&self, filter: &CertificateFilter) -> Result<Vec<Certificate>, Error> {
        self.aggregator.list(filter)
    }

    /// Sign `request.input` into a new `<name>_signed.<ext>` file next to it
    /// and return that path. The input is only read.
    pub fn sign(&self, request: &SigningRequest) -> Result<PathBuf, Error> {
        let mut profile = match &request.profile_id {
            Some(id) => self.profiles.get(id)?,
            None => self.profiles.get_default()?,
        };
        if let Some(position) = &request.position {
            position.apply_to(&mut profile)?;
        }
        profile.validate()?;

        let certificate = self.aggregator.find(&request.fingerprint)?;
        check_signable(&certificate)?;

        let input = fs::read(&request.input)?;
        let output_path = request.output_path();
        if output_path == request.input {
            return Err(Error::Other(format!(
                "Refusing to overwrite the input `{}`",
                request.input.display()
            )));
        }

        let mut signer = open_signer(&certificate, &request.credential, &self.settings)
            .map_err(|err| err.at_stage(SigningStage::BackendAccess))?;
        let result = self.sign_with(
            &*signer,
            &profile,
            &certificate,
            &input,
            &request.input,
            &output_path,
        );
        if let Err(err) = signer.close() {
            log::warn!("Closing the signer for `{}` failed: {}", certificate.name, err);
        }

        result?;
        log::info!("Signed document written to `{}`.", output_path.display());
        Ok(output_path)
    }

    pub fn verify(&self, path: &Path) -> Result<Vec<VerificationResult>, Error> {
        self.verifier.verify_file(path)
    }

    fn sign_with(
        &self,
        signer: &dyn CredentialSigner,
        profile: &SignatureProfile,
        certificate: &Certificate,
        input: &[u8],
        input_path: &Path,
        output_path: &Path,
    ) -> Result<(), Error> {
        let file_name = input_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut document = PDFSigningDocument::read_from(input, file_name)
            .map_err(|err| err.at_stage(SigningStage::LibrarySigning))?;

        let mut kind = SignatureKind::for_visibility(profile.visibility);
        if kind == SignatureKind::Certification && document.has_signatures()? {
            log::warn!(
                "Document is already signed, adding an approval signature instead of a certification."
            );
            kind = SignatureKind::Approval;
        }

        let placement = self.placement(&document, profile, certificate)?;
        let metadata = SignatureMetadata {
            signer_name: certificate.name.clone(),
            reason: profile.reason.clone(),
            location: profile.location.clone(),
            contact_info: profile.contact_info.clone(),
            signed_at: Utc::now(),
            kind,
        };
        let signed = document
            .sign_document(signer, &metadata, &placement)
            .map_err(|err| err.at_stage(SigningStage::LibrarySigning))?;

        write_and_check(output_path, &signed)
            .map_err(|err| err.at_stage(SigningStage::OutputVerification))
    }

    /// Page, rectangle and stamp for the profile.
    fn placement(
        &self,
        document: &PDFSigningDocument,
        profile: &SignatureProfile,
        certificate: &Certificate,
    ) -> Result<FieldPlacement, Error> {
        let position = match (&profile.position, profile.is_visible()) {
            (Some(position), true) => position,
            _ => {
                return Ok(FieldPlacement {
                    page_id: document.page_id(1)?,
                    rect: Rectangle::default(),
                    appearance_png: None,
                })
            }
        };
        let page = position.page.resolve(document.page_count())?;
        let stamp = self.renderer.render(
            &profile.appearance,
            &position.rect,
            certificate,
            &Local::now(),
        )?;
        Ok(FieldPlacement {
            page_id: document.page_id(page)?,
            rect: Rectangle::from(&position.rect),
            appearance_png: Some(stamp.to_png()?),
        })
    }
}

/// Reject certificates that can not produce a trustworthy signature.
pub fn check_signable(certificate: &Certificate) -> Result<(), Error> {
    if !certificate.is_valid {
        return Err(Error::CertificateNotUsable(format!(
            "certificate '{}' is not valid (expired or not yet valid)",
            certificate.name
        )));
    }
    if !certificate.has_signing_capability() {
        return Err(Error::CertificateNotUsable(format!(
            "certificate '{}' does not have digital signature capability",
            certificate.name
        )));
    }
    if certificate.is_self_signed() || certificate.is_authority {
        return Err(Error::CertificateNotUsable(format!(
            "certificate '{}' is self-signed or a certificate authority",
            certificate.name
        )));
    }
    Ok(())
}

/// Hidden sibling of `output_path` the signed bytes are staged in.
fn partial_path(output_path: &Path) -> PathBuf {
    let name = output_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_path.with_file_name(format!(".{}.partial", name))
}

/// Stage the signed file next to `output_path`, make sure it reads back as
/// a PDF, then move it into place. An existing file at `output_path` is only
/// replaced once the new one checks out.
fn write_and_check(output_path: &Path, signed: &[u8]) -> Result<(), Error> {
    let staged = partial_path(output_path);
    let result = write_checked(&staged, signed)
        .and_then(|()| fs::rename(&staged, output_path).map_err(Error::from));
    if result.is_err() {
        remove_partial_output(&staged);
    }
    result
}

fn write_checked(path: &Path, signed: &[u8]) -> Result<(), Error> {
    fs::write(path, signed)?;
    let written = fs::read(path)?;
    if written != signed {
        return Err(Error::Other(format!(
            "`{}` does not hold the signed bytes",
            path.display()
        )));
    }
    lopdf::Document::load_mem(&written)?;
    Ok(())
}

fn remove_partial_output(output_path: &Path) {
    if !output_path.exists() {
        return;
    }
    match fs::remove_file(output_path) {
        Ok(()) => log::debug!("Removed partial output `{}`.", output_path.display()),
        Err(err) => log::error!(
            "Could not remove partial output `{}`: {}",
            output_path.display(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mint_ca, mint_expired_leaf, mint_leaf};
    use crate::BackendHint;
    use lopdf::dictionary;

    fn certificate(x509: &openssl::x509::X509) -> Certificate {
        Certificate::from_der(
            &x509.to_der().unwrap(),
            BackendHint::SoftwareStore {
                file_path: PathBuf::from("/tmp/signer.p12"),
            },
            "signer",
        )
        .unwrap()
    }

    #[test]
    fn usable_leaf_passes() {
        let (ca, ca_key) = mint_ca("Test CA");
        let (leaf, _) = mint_leaf(&ca, &ca_key, "Alice", true);
        check_signable(&certificate(&leaf)).unwrap();
    }

    #[test]
    fn expired_leaf_is_rejected() {
        let (ca, ca_key) = mint_ca("Test CA");
        let leaf = mint_expired_leaf(&ca, &ca_key, "Bob");
        assert!(matches!(
            check_signable(&certificate(&leaf)),
            Err(Error::CertificateNotUsable(_))
        ));
    }

    #[test]
    fn encryption_only_leaf_is_rejected() {
        let (ca, ca_key) = mint_ca("Test CA");
        let (leaf, _) = mint_leaf(&ca, &ca_key, "Carol", false);
        assert!(matches!(
            check_signable(&certificate(&leaf)),
            Err(Error::CertificateNotUsable(_))
        ));
    }

    #[test]
    fn self_signed_authority_is_rejected() {
        let (ca, _) = mint_ca("Test CA");
        assert!(matches!(
            check_signable(&certificate(&ca)),
            Err(Error::CertificateNotUsable(_))
        ));
    }

    #[test]
    fn staged_file_replaces_the_output_only_when_valid() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("memo_signed.pdf");
        fs::write(&output, b"previous run").unwrap();

        assert!(write_and_check(&output, b"not a pdf").is_err());
        assert_eq!(fs::read(&output).unwrap(), b"previous run");
        assert!(!partial_path(&output).exists());

        let mut doc = lopdf::Document::with_version("1.7");
        let pages_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<lopdf::Object>::new(),
            "Count" => 0i64,
        });
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut pdf = vec![];
        doc.save_to(&mut pdf).unwrap();
        write_and_check(&output, &pdf).unwrap();
        assert_eq!(fs::read(&output).unwrap(), pdf);
        assert!(!partial_path(&output).exists());
    }

    #[test]
    fn partial_path_is_a_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/tmp/out/a_signed.pdf")),
            PathBuf::from("/tmp/out/.a_signed.pdf.partial")
        );
    }

    #[test]
    fn partial_output_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("half_signed.pdf");
        fs::write(&path, b"%PDF-1.7 truncated").unwrap();
        remove_partial_output(&path);
        assert!(!path.exists());
        // missing files are fine
        remove_partial_output(&path);
    }
}
