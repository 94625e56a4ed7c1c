//! Check the signatures embedded in a PDF.
//!
//! Every signed signature field yields one [`VerificationResult`]. Problems
//! with a single signature end up in its result; only a file that can not
//! be read as a PDF is an error.

mod revocation;

use crate::acro_form::{AcroForm, FormComponent, SignatureValue};
use crate::config::Settings;
use crate::{lopdf_utils, ByteRange, Error};
use chrono::{DateTime, TimeZone, Utc};
use cryptographic_message_syntax::{SignedData, SignerInfo};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use x509_certificate::CapturedX509Certificate;
use x509_parser::prelude::*;

/// Longest issuer chain followed from the signer certificate.
const MAX_CHAIN_LENGTH: usize = 8;

const DETACHED_SUB_FILTERS: [&str; 2] = ["adbe.pkcs7.detached", "ETSI.CAdES.detached"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum RevocationStatus {
    /// The signature carries no CRL from the signer's issuer.
    NotChecked,
    /// Not listed on the issuer CRLs embedded in the signature.
    Good,
    Revoked {
        at: Option<DateTime<Utc>>,
        before_signing: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TimestampStatus {
    Missing,
    Valid { trusted: bool },
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub field_name: Option<String>,
    pub signer_name: String,
    #[serde(rename = "signerDN")]
    pub signer_dn: String,
    pub signing_time: Option<DateTime<Utc>>,
    pub signing_hash_algorithm: String,
    pub signature_type: String,
    /// Signature and message digest check out.
    pub is_valid: bool,
    /// Trusted issuer and not revoked.
    pub certificate_valid: bool,
    pub validation_message: String,
    pub certificate_validation_message: String,
    pub revocation: RevocationStatus,
    pub timestamp: TimestampStatus,
    pub warnings: Vec<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    /// DocMDP `P` value of a certification signature.
    pub certification_level: Option<i64>,
    pub covers_whole_document: bool,
}

impl VerificationResult {
    fn from_value(field_name: Option<&str>, value: &SignatureValue) -> Self {
        VerificationResult {
            field_name: field_name.map(str::to_owned),
            signer_name: value.name.clone().unwrap_or_default(),
            signer_dn: String::new(),
            signing_time: value
                .signing_time
                .as_deref()
                .and_then(lopdf_utils::parse_pdf_date)
                .map(|time| time.with_timezone(&Utc)),
            signing_hash_algorithm: String::new(),
            signature_type: String::new(),
            is_valid: false,
            certificate_valid: false,
            validation_message: String::new(),
            certificate_validation_message: String::new(),
            revocation: RevocationStatus::NotChecked,
            timestamp: TimestampStatus::Missing,
            warnings: vec![],
            reason: value.reason.clone(),
            location: value.location.clone(),
            contact_info: value.contact_info.clone(),
            certification_level: value.doc_mdp_permission,
            covers_whole_document: false,
        }
    }
}

/// Checks signatures against a fixed set of trust anchors.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    anchors: Vec<CapturedX509Certificate>,
}

impl Verifier {
    pub fn new(anchors: Vec<CapturedX509Certificate>) -> Self {
        Verifier { anchors }
    }

    /// Trust the certificates found in the configured certificate stores.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(load_trust_anchors(&settings.certificate_stores))
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn verify_file(&self, path: &Path) -> Result<Vec<VerificationResult>, Error> {
        let data = fs::read(path)?;
        self.verify(&data)
    }

    /// One result per signed signature field, empty for an unsigned document.
    pub fn verify(&self, data: &[u8]) -> Result<Vec<VerificationResult>, Error> {
        let document = lopdf::Document::load_mem(data)?;
        let forms = AcroForm::load_all_forms(&document)?;
        let results: Vec<VerificationResult> = forms
            .iter()
            .filter_map(|form| match form.get_form_component() {
                FormComponent::SignedSignature(value) => {
                    Some(self.verify_signature(form.get_partial_field_name(), value, data))
                }
                _ => None,
            })
            .collect();
        log::debug!("Found {} signature(s).", results.len());
        Ok(results)
    }

    fn verify_signature(
        &self,
        field_name: Option<&str>,
        value: &SignatureValue,
        data: &[u8],
    ) -> VerificationResult {
        let mut result = VerificationResult::from_value(field_name, value);
        let byte_range = ByteRange::from(value.byte_range.clone());
        result.covers_whole_document = byte_range.covers_whole_file(data.len());
        if !result.covers_whole_document {
            result
                .warnings
                .push("byte range does not cover the whole document".to_owned());
        }
        if let Some(warning) = sub_filter_warning(value) {
            result.warnings.push(warning);
        }

        let container = &value.contents[..der_length(&value.contents)];
        let signed_data = match SignedData::parse_ber(container) {
            Ok(signed_data) => signed_data,
            Err(err) => {
                log::warn!("Can not parse signature container: {}", err);
                return self.finish(result, Some(err.to_string()), None, &[]);
            }
        };
        let signer = match signed_data.signers().next() {
            Some(signer) => signer,
            None => {
                let error = Some("no signer in container".to_owned());
                return self.finish(result, error, None, &[]);
            }
        };

        result.signing_hash_algorithm = format!("{:?}", signer.digest_algorithm()).to_uppercase();
        result.signature_type = format!("{:?}", signer.signature_algorithm());
        if let Some(time) = signer
            .signed_attributes()
            .and_then(|attributes| attributes.signing_time().map(|t| t.to_owned()))
        {
            result.signing_time = Some(time);
        }

        let crypto_error = byte_range
            .signed_data(data)
            .and_then(|content| {
                signer.verify_signature_with_signed_data(&signed_data)?;
                signer.verify_message_digest_with_content(&content)?;
                Ok(())
            })
            .err()
            .map(|err| err.to_string());
        result.timestamp = self.timestamp_status(signer);

        let certificates: Vec<CapturedX509Certificate> =
            signed_data.certificates().cloned().collect();
        let leaf = find_signer_certificate(signer, &certificates);
        let crls = revocation::embedded_crls(container);
        self.finish(
            result,
            crypto_error,
            leaf.map(|leaf| (leaf, certificates.as_slice())),
            &crls,
        )
    }

    /// Fill in identity, trust, revocation and the messages.
    fn finish(
        &self,
        mut result: VerificationResult,
        crypto_error: Option<String>,
        leaf: Option<(&CapturedX509Certificate, &[CapturedX509Certificate])>,
        crls: &[&[u8]],
    ) -> VerificationResult {
        result.is_valid = crypto_error.is_none();
        let mut key_usage_issue = None;
        let mut trusted = false;

        if let Some((leaf, intermediates)) = leaf {
            match parse_x509_certificate(leaf.constructed_data()) {
                Ok((_, x509)) => {
                    result.signer_dn = x509.subject().to_string();
                    if result.signer_name.trim().is_empty() {
                        result.signer_name = crate::certificate::common_name(x509.subject())
                            .unwrap_or_else(|| result.signer_dn.clone());
                    }
                    if let Some(warning) = validity_warning(&x509, result.signing_time) {
                        result.warnings.push(warning);
                    }
                    result.revocation =
                        revocation::revocation_status(crls, &x509, result.signing_time);
                    key_usage_issue = match x509.key_usage() {
                        Ok(Some(ext))
                            if !(ext.value.digital_signature() || ext.value.non_repudiation()) =>
                        {
                            Some("certificate is not allowed to sign documents".to_owned())
                        }
                        _ => None,
                    };
                }
                Err(err) => log::warn!("Can not parse signer certificate: {}", err),
            }
            trusted = self.chains_to_anchor(leaf, intermediates);
        }

        result.certificate_valid =
            trusted && !matches!(result.revocation, RevocationStatus::Revoked { .. });
        result.validation_message = validation_message(
            crypto_error.as_deref(),
            &result.warnings,
            result.timestamp,
        );
        result.certificate_validation_message =
            certificate_message(trusted, result.revocation, key_usage_issue.as_deref());
        result
    }

    fn timestamp_status(&self, signer: &SignerInfo) -> TimestampStatus {
        match signer.verify_time_stamp_token() {
            Ok(None) => TimestampStatus::Missing,
            Ok(Some(_)) => {
                let trusted = match signer.time_stamp_token_signed_data() {
                    Ok(Some(token)) => {
                        let certificates: Vec<CapturedX509Certificate> =
                            token.certificates().cloned().collect();
                        token
                            .signers()
                            .next()
                            .and_then(|tsa| find_signer_certificate(tsa, &certificates))
                            .map(|tsa| self.chains_to_anchor(tsa, &certificates))
                            .unwrap_or(false)
                    }
                    _ => false,
                };
                TimestampStatus::Valid { trusted }
            }
            Err(err) => {
                log::debug!("Time stamp token does not verify: {}", err);
                TimestampStatus::Invalid
            }
        }
    }

    /// Walk issuer links through `intermediates` until a trust anchor signs.
    fn chains_to_anchor(
        &self,
        leaf: &CapturedX509Certificate,
        intermediates: &[CapturedX509Certificate],
    ) -> bool {
        let mut current = leaf;
        for _ in 0..MAX_CHAIN_LENGTH {
            let anchored = self.anchors.iter().any(|anchor| {
                anchor.constructed_data() == current.constructed_data()
                    || (anchor.subject_name() == current.issuer_name()
                        && current.verify_signed_by_certificate(anchor).is_ok())
            });
            if anchored {
                return true;
            }
            let issuer = intermediates.iter().find(|candidate| {
                candidate.constructed_data() != current.constructed_data()
                    && candidate.subject_name() == current.issuer_name()
                    && current.verify_signed_by_certificate(*candidate).is_ok()
            });
            match issuer {
                Some(issuer) => current = issuer,
                None => return false,
            }
        }
        false
    }
}

fn sub_filter_warning(value: &SignatureValue) -> Option<String> {
    match value.sub_filter.as_deref() {
        Some(sub_filter) if DETACHED_SUB_FILTERS.contains(&sub_filter) => None,
        Some(sub_filter) => Some(format!("unexpected sub filter {}", sub_filter)),
        None => Some(format!("no sub filter for {}", value.filter)),
    }
}

/// The embedded certificate matching the signer's issuer and serial number.
fn find_signer_certificate<'a>(
    signer: &SignerInfo,
    certificates: &'a [CapturedX509Certificate],
) -> Option<&'a CapturedX509Certificate> {
    match signer.certificate_issuer_and_serial() {
        Some((issuer, serial)) => certificates.iter().find(|certificate| {
            certificate.serial_number_asn1() == serial && certificate.issuer_name() == issuer
        }),
        None => certificates.first(),
    }
}

fn validity_warning(
    x509: &X509Certificate<'_>,
    signing_time: Option<DateTime<Utc>>,
) -> Option<String> {
    let signing_time = signing_time?;
    let not_before = Utc
        .timestamp_opt(x509.validity().not_before.timestamp(), 0)
        .single()?;
    let not_after = Utc
        .timestamp_opt(x509.validity().not_after.timestamp(), 0)
        .single()?;
    if signing_time < not_before || signing_time > not_after {
        Some(format!(
            "signing time {} is outside the certificate validity period",
            signing_time.format("%Y-%m-%d %H:%M:%S UTC")
        ))
    } else {
        None
    }
}

/// The `Contents` string is zero padded, keep only the DER encoded container.
fn der_length(contents: &[u8]) -> usize {
    if contents.len() < 2 || contents[0] != 0x30 {
        return contents.len();
    }
    let first = contents[1] as usize;
    let total = if first < 0x80 {
        2 + first
    } else {
        let count = first & 0x7f;
        // Indefinite length or absurd sizes: let the BER parser decide.
        if count == 0 || count > 4 || contents.len() < 2 + count {
            return contents.len();
        }
        let length = contents[2..2 + count]
            .iter()
            .fold(0usize, |acc, byte| (acc << 8) | *byte as usize);
        2 + count + length
    };
    total.min(contents.len())
}

fn validation_message(
    crypto_error: Option<&str>,
    warnings: &[String],
    timestamp: TimestampStatus,
) -> String {
    let mut message = match crypto_error {
        None => "Signature is cryptographically valid".to_owned(),
        Some(err) => format!("Signature validation failed: {}", err),
    };
    if !warnings.is_empty() {
        message.push_str("; warnings: ");
        message.push_str(&warnings.join(", "));
    }
    match timestamp {
        TimestampStatus::Missing => {}
        TimestampStatus::Valid { trusted: true } => {
            message.push_str(" with valid trusted timestamp")
        }
        TimestampStatus::Valid { trusted: false } => {
            message.push_str(" with valid but untrusted timestamp")
        }
        TimestampStatus::Invalid => message.push_str(" with invalid timestamp"),
    }
    message
}

fn certificate_message(
    trusted: bool,
    revocation: RevocationStatus,
    key_usage_issue: Option<&str>,
) -> String {
    match revocation {
        RevocationStatus::Revoked { at, before_signing } => {
            let mut message = "Certificate has been revoked".to_owned();
            if let Some(at) = at {
                message.push_str(&format!(" on {}", at.format("%Y-%m-%d %H:%M:%S")));
            }
            if before_signing {
                message.push_str(" (revoked before signing)");
            }
            message
        }
        RevocationStatus::NotChecked | RevocationStatus::Good if trusted => {
            "Certificate is valid and trusted".to_owned()
        }
        RevocationStatus::NotChecked | RevocationStatus::Good => {
            let mut message =
                "Certificate chain validation issue (not in system trust store)".to_owned();
            if let Some(issue) = key_usage_issue {
                message.push_str("; Key usage: ");
                message.push_str(issue);
            }
            message
        }
    }
}

/// Certificates in `.pem`, `.crt` and `.cer` files directly inside `directories`.
pub fn load_trust_anchors(directories: &[PathBuf]) -> Vec<CapturedX509Certificate> {
    let mut anchors = vec![];
    for directory in directories {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(err) => {
                log::debug!("Skipping trust store `{}`: {}", directory.display(), err);
                continue;
            }
        };
        for path in entries.flatten().map(|entry| entry.path()) {
            let is_certificate_file = path
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_ascii_lowercase();
                    ext == "pem" || ext == "crt" || ext == "cer"
                })
                .unwrap_or(false);
            if !is_certificate_file {
                continue;
            }
            let Ok(data) = fs::read(&path) else {
                continue;
            };
            let is_pem = data.starts_with(b"-----")
                || data.windows(11).any(|window| window == b"-----BEGIN ");
            let parsed = if is_pem {
                CapturedX509Certificate::from_pem_multiple(&data)
            } else {
                CapturedX509Certificate::from_der(data).map(|certificate| vec![certificate])
            };
            match parsed {
                Ok(certificates) => anchors.extend(certificates),
                Err(err) => log::debug!("Ignoring `{}`: {}", path.display(), err),
            }
        }
    }
    log::debug!("Loaded {} trust anchor(s).", anchors.len());
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::minimal_pdf;

    #[test]
    fn der_length_drops_zero_padding() {
        let mut contents = vec![0x30, 0x03, 1, 2, 3];
        contents.extend_from_slice(&[0; 20]);
        assert_eq!(der_length(&contents), 5);

        let mut long = vec![0x30, 0x82, 0x01, 0x00];
        long.extend_from_slice(&[7; 256]);
        long.extend_from_slice(&[0; 10]);
        assert_eq!(der_length(&long), 260);

        let indefinite = vec![0x30, 0x80, 1, 2, 0, 0];
        assert_eq!(der_length(&indefinite), indefinite.len());
        assert_eq!(der_length(&[0, 0, 0]), 3);
    }

    #[test]
    fn unsigned_document_has_no_results() {
        let results = Verifier::default().verify(&minimal_pdf(2)).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn not_a_pdf_is_an_error() {
        assert!(Verifier::default().verify(b"plain text, not a PDF").is_err());
    }

    #[test]
    fn unknown_sub_filters_are_flagged() {
        let mut value = SignatureValue {
            filter: "Adobe.PPKLite".to_owned(),
            sub_filter: Some("adbe.pkcs7.detached".to_owned()),
            contents: vec![],
            byte_range: vec![],
            name: None,
            signing_time: None,
            reason: None,
            location: None,
            contact_info: None,
            doc_mdp_permission: None,
        };
        assert_eq!(sub_filter_warning(&value), None);
        value.sub_filter = Some("adbe.x509.rsa_sha1".to_owned());
        assert_eq!(
            sub_filter_warning(&value).as_deref(),
            Some("unexpected sub filter adbe.x509.rsa_sha1")
        );
        value.sub_filter = None;
        assert!(sub_filter_warning(&value).is_some());
    }

    #[test]
    fn validation_messages() {
        assert_eq!(
            validation_message(None, &[], TimestampStatus::Missing),
            "Signature is cryptographically valid"
        );
        assert_eq!(
            validation_message(
                Some("digest mismatch"),
                &["late".to_owned()],
                TimestampStatus::Valid { trusted: false }
            ),
            "Signature validation failed: digest mismatch; warnings: late with valid but untrusted timestamp"
        );
        assert_eq!(
            validation_message(None, &[], TimestampStatus::Invalid),
            "Signature is cryptographically valid with invalid timestamp"
        );
    }

    #[test]
    fn certificate_messages() {
        assert_eq!(
            certificate_message(true, RevocationStatus::NotChecked, None),
            "Certificate is valid and trusted"
        );
        assert_eq!(
            certificate_message(false, RevocationStatus::NotChecked, Some("no signing")),
            "Certificate chain validation issue (not in system trust store); Key usage: no signing"
        );
        assert_eq!(
            certificate_message(true, RevocationStatus::Good, None),
            "Certificate is valid and trusted"
        );
        let revoked = RevocationStatus::Revoked {
            at: Some(Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap()),
            before_signing: true,
        };
        assert_eq!(
            certificate_message(true, revoked, None),
            "Certificate has been revoked on 2024-02-03 04:05:06 (revoked before signing)"
        );
    }

    #[test]
    fn trust_anchors_are_read_from_pem_and_der() {
        let dir = tempfile::tempdir().unwrap();
        let (ca, _) = crate::test_support::mint_ca("Anchor CA");
        fs::write(dir.path().join("ca.pem"), ca.to_pem().unwrap()).unwrap();
        fs::write(dir.path().join("ca.cer"), ca.to_der().unwrap()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        fs::write(dir.path().join("broken.crt"), b"garbage").unwrap();
        let anchors = load_trust_anchors(&[dir.path().to_path_buf()]);
        assert_eq!(anchors.len(), 2);
    }
}
