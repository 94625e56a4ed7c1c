//! Revocation lists carried inside a CMS signature: the `crls` field of
//! `SignedData` and the `adbe-revocationInfoArchival` signed attribute.

use super::RevocationStatus;
use chrono::{DateTime, TimeZone, Utc};
use x509_parser::der_parser::asn1_rs::{Any, Class, FromBer, Tag};
use x509_parser::prelude::*;

/// Content octets of OID 1.2.840.113583.1.1.8.
const REVOCATION_INFO_ARCHIVAL: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x2f, 0x01, 0x01, 0x08];

/// Elements of a constructed value, each with its complete encoding.
fn children<'a>(data: &'a [u8]) -> Vec<(&'a [u8], Any<'a>)> {
    let mut input = data;
    let mut items = vec![];
    while !input.is_empty() {
        let Ok((rest, any)) = Any::from_ber(input) else {
            break;
        };
        items.push((&input[..input.len() - rest.len()], any));
        input = rest;
    }
    items
}

fn is_context(any: &Any<'_>, tag: u32) -> bool {
    any.header.class() == Class::ContextSpecific && any.header.tag() == Tag(tag)
}

fn is_universal(any: &Any<'_>, tag: Tag) -> bool {
    any.header.class() == Class::Universal && any.header.tag() == tag
}

/// DER encoded CRLs found in a `ContentInfo` wrapping `SignedData`.
pub(super) fn embedded_crls(container: &[u8]) -> Vec<&[u8]> {
    let mut crls = vec![];
    let Ok((_, content_info)) = Any::from_ber(container) else {
        return crls;
    };
    let Some(explicit) = children(content_info.data)
        .into_iter()
        .map(|(_, any)| any)
        .find(|any| is_context(any, 0))
    else {
        return crls;
    };
    let Ok((_, signed_data)) = Any::from_ber(explicit.data) else {
        return crls;
    };
    let fields = children(signed_data.data);
    for (_, field) in &fields {
        if is_context(field, 1) {
            crls.extend(children(field.data).into_iter().map(|(raw, _)| raw));
        }
    }
    // signerInfos is the last SET of SignedData
    let signer_infos = fields
        .iter()
        .rev()
        .find(|(_, field)| is_universal(field, Tag::Set));
    if let Some((_, signer_infos)) = signer_infos {
        for (_, signer_info) in children(signer_infos.data) {
            let attributes = children(signer_info.data)
                .into_iter()
                .find(|(_, field)| is_context(field, 0));
            if let Some((_, attributes)) = attributes {
                crls.extend(archived_crls(attributes.data));
            }
        }
    }
    crls
}

/// CRLs listed under `crl [0] EXPLICIT SEQUENCE OF CRL` of each
/// `RevocationInfoArchival` attribute value.
fn archived_crls(attributes: &[u8]) -> Vec<&[u8]> {
    let mut crls = vec![];
    for (_, attribute) in children(attributes) {
        let parts = children(attribute.data);
        let is_archival = parts.first().map_or(false, |(_, oid)| {
            is_universal(oid, Tag::Oid) && oid.data == REVOCATION_INFO_ARCHIVAL
        });
        if !is_archival {
            continue;
        }
        let Some((_, values)) = parts.get(1) else {
            continue;
        };
        for (_, archival) in children(values.data) {
            for (_, choice) in children(archival.data) {
                if !is_context(&choice, 0) {
                    continue;
                }
                if let Ok((_, list)) = Any::from_ber(choice.data) {
                    crls.extend(children(list.data).into_iter().map(|(raw, _)| raw));
                }
            }
        }
    }
    crls
}

/// Look up `leaf` on every CRL issued by its issuer. CRL signatures are not
/// checked, an entry only ever makes the verdict stricter.
pub(super) fn revocation_status(
    crls: &[&[u8]],
    leaf: &X509Certificate<'_>,
    signing_time: Option<DateTime<Utc>>,
) -> RevocationStatus {
    let mut consulted = false;
    for data in crls {
        let crl = match parse_x509_crl(data) {
            Ok((_, crl)) => crl,
            Err(err) => {
                log::debug!("Ignoring embedded CRL: {}", err);
                continue;
            }
        };
        if crl.issuer() != leaf.issuer() {
            continue;
        }
        consulted = true;
        let entry = crl
            .iter_revoked_certificates()
            .find(|revoked| revoked.raw_serial() == leaf.raw_serial());
        if let Some(entry) = entry {
            let at = Utc
                .timestamp_opt(entry.revocation_date.timestamp(), 0)
                .single();
            let before_signing = match (at, signing_time) {
                (Some(at), Some(signed)) => at <= signed,
                _ => false,
            };
            return RevocationStatus::Revoked { at, before_signing };
        }
    }
    if consulted {
        RevocationStatus::Good
    } else {
        RevocationStatus::NotChecked
    }
}
