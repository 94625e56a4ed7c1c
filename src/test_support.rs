//! Throwaway certificates, bundles and PDFs for unit tests.

use lopdf::{dictionary, Document, Object, Stream};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509NameBuilder, X509};

const DAY: i64 = 24 * 60 * 60;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn name(common_name: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder
        .append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    builder
        .append_entry_by_nid(Nid::ORGANIZATIONNAME, "Example Org")
        .unwrap();
    builder.build()
}

fn serial() -> Asn1Integer {
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    serial.to_asn1_integer().unwrap()
}

pub(crate) fn mint_ca(common_name: &str) -> (X509, PKey<Private>) {
    let key = rsa_key();
    let subject = name(common_name);
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&serial()).unwrap();
    builder.set_subject_name(&subject).unwrap();
    builder.set_issuer_name(&subject).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(now() - DAY).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(now() + 365 * DAY).unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .unwrap(),
        )
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (builder.build(), key)
}

fn leaf_between(
    ca: &X509,
    ca_key: &PKey<Private>,
    common_name: &str,
    signing_usage: bool,
    not_before: i64,
    not_after: i64,
) -> (X509, PKey<Private>) {
    let key = rsa_key();
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&serial()).unwrap();
    builder.set_subject_name(&name(common_name)).unwrap();
    builder.set_issuer_name(ca.subject_name()).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(not_before).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().build().unwrap())
        .unwrap();
    let usage = if signing_usage {
        KeyUsage::new()
            .critical()
            .digital_signature()
            .non_repudiation()
            .build()
            .unwrap()
    } else {
        KeyUsage::new().critical().key_encipherment().build().unwrap()
    };
    builder.append_extension(usage).unwrap();
    builder.sign(ca_key, MessageDigest::sha256()).unwrap();
    (builder.build(), key)
}

pub(crate) fn mint_leaf(
    ca: &X509,
    ca_key: &PKey<Private>,
    common_name: &str,
    signing_usage: bool,
) -> (X509, PKey<Private>) {
    leaf_between(
        ca,
        ca_key,
        common_name,
        signing_usage,
        now() - DAY,
        now() + 90 * DAY,
    )
}

pub(crate) fn mint_expired_leaf(ca: &X509, ca_key: &PKey<Private>, common_name: &str) -> X509 {
    leaf_between(ca, ca_key, common_name, true, now() - 30 * DAY, now() - DAY).0
}

/// PKCS#12 bundle with an unencrypted certificate bag and a shrouded key.
pub(crate) fn p12_bundle(leaf: &X509, key: &PKey<Private>, password: &str) -> Vec<u8> {
    let mut builder = Pkcs12::builder();
    builder.name("Test Signer").pkey(key).cert(leaf);
    // -1 leaves the certificate bag unencrypted.
    builder.cert_algorithm(Nid::from_raw(-1));
    builder.build2(password).unwrap().to_der().unwrap()
}

/// A small single or multi page PDF.
pub(crate) fn minimal_pdf(page_count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut kids = vec![];
    for index in 0..page_count {
        let content = format!("BT /F1 12 Tf 72 720 Td (Page {}) Tj ET", index + 1);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => page_count as i64,
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut data = Vec::new();
    doc.save_to(&mut data).unwrap();
    data
}
