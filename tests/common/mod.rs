#![allow(dead_code)]

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509NameBuilder, X509};
use pdf_signing_backends::lopdf::{dictionary, Document, Object, Stream};
use pdf_signing_backends::{ProfileStore, Settings, SigningService};
use std::fs;
use std::path::{Path, PathBuf};

const DAY: i64 = 24 * 60 * 60;

pub struct Identity {
    pub ca: X509,
    pub leaf: X509,
    pub fingerprint: String,
}

fn name(common_name: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder
        .append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    builder.build()
}

fn serial() -> Asn1Integer {
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    serial.to_asn1_integer().unwrap()
}

fn certificate(
    subject: &X509Name,
    issuer: &X509Name,
    key: &PKey<Private>,
    signer_key: &PKey<Private>,
    ca: bool,
) -> X509 {
    let now = chrono::Utc::now().timestamp();
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&serial()).unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(now - DAY).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(now + 90 * DAY).unwrap())
        .unwrap();
    if ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().key_cert_sign().crl_sign().build().unwrap())
            .unwrap();
    } else {
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .non_repudiation()
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }
    builder.sign(signer_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// A CA, a signing leaf below it and the leaf's PKCS#12 bundle written to
/// `store/<file_name>`.
pub fn write_identity(store: &Path, file_name: &str, common_name: &str, password: &str) -> Identity {
    let ca_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let ca_name = name("Integration Test CA");
    let ca = certificate(&ca_name, &ca_name, &ca_key, &ca_key, true);

    let leaf_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let leaf = certificate(&name(common_name), &ca_name, &leaf_key, &ca_key, false);

    let mut builder = Pkcs12::builder();
    builder.name(common_name).pkey(&leaf_key).cert(&leaf);
    // -1 leaves the certificate bag unencrypted.
    builder.cert_algorithm(Nid::from_raw(-1));
    let bundle = builder.build2(password).unwrap().to_der().unwrap();
    fs::create_dir_all(store).unwrap();
    fs::write(store.join(file_name), bundle).unwrap();

    let fingerprint = pdf_signing_backends::certificate::fingerprint(&leaf.to_der().unwrap());
    Identity {
        ca,
        leaf,
        fingerprint,
    }
}

pub fn write_pdf(path: &Path, page_count: usize) {
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
    doc.save(path).unwrap();
}

/// Settings that only look at `store`: no tokens, no NSS, no network.
pub fn isolated_settings(store: &Path) -> Settings {
    Settings {
        certificate_stores: vec![store.to_path_buf()],
        token_libraries: vec![],
        trust_database: None,
        nss_library: None,
        font_paths: vec![],
        location_lookup: false,
    }
}

pub fn service(root: &Path) -> SigningService {
    SigningService::new(
        isolated_settings(&root.join("store")),
        ProfileStore::new(root.join("profiles")),
    )
    .unwrap()
}

pub fn store_dir(root: &Path) -> PathBuf {
    root.join("store")
}
