//! Fixtures shared by the integration tests: small PDFs, PKCS#12
//! containers with chosen validity windows, and raster images.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{EncapsulatedContentInfo, SignedData, SignerInfos};
use der::asn1::{GeneralizedTime, Int, ObjectIdentifier, OctetString, SetOfVec};
use der::{Any, Encode};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Name, X509};

use pdf_seal::clock::FixedClock;
use pdf_seal::geometry::{CanvasSize, SignaturePlacement};
use pdf_seal::pipeline::{SigningRequest, SigningService};
use pdf_seal::signatures::DigestAlgorithm;
use spki::AlgorithmIdentifierOwned;
use x509_tsp::{MessageImprint, TspVersion, TstInfo};

pub const PASSWORD: &str = "correct horse";

/// A fixed signing instant inside every default certificate window.
pub fn signing_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Letter-sized PDF with `pages` pages and a classic xref table.
pub fn simple_pdf(pages: usize) -> Vec<u8> {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", 3 + i * 2)).collect();
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} /MediaBox [0 0 612 792] >>",
            kids.join(" "),
            pages
        ),
    ];
    for i in 0..pages {
        let content = format!("BT /F1 12 Tf 72 720 Td (Page {}) Tj ET", i + 1);
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /Contents {} 0 R /Resources << /Font << /F1 << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> >> >> >>",
            4 + i * 2
        ));
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }
    assemble(&objects)
}

/// Serialize numbered objects (1..) with a classic xref table.
pub fn assemble(objects: &[String]) -> Vec<u8> {
    let mut pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    pdf
}

/// One-page PDF whose cross-reference section is an uncompressed xref stream.
pub fn xref_stream_pdf() -> Vec<u8> {
    let bodies = [
        "<< /Type /Catalog /Pages 2 0 R >>",
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] >>",
    ];
    let mut pdf = b"%PDF-1.5\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_offset = pdf.len();
    // W [1 4 2]: type, offset, generation
    let mut rows = vec![0u8, 0, 0, 0, 0, 0xFF, 0xFF];
    for offset in offsets.iter().copied().chain(std::iter::once(xref_offset)) {
        rows.push(1);
        rows.extend_from_slice(&(offset as u32).to_be_bytes());
        rows.extend_from_slice(&[0, 0]);
    }
    pdf.extend_from_slice(
        format!(
            "4 0 obj\n<< /Type /XRef /Size 5 /W [1 4 2] /Root 1 0 R /Length {} >>\nstream\n",
            rows.len()
        )
        .as_bytes(),
    );
    pdf.extend_from_slice(&rows);
    pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    pdf
}

/// PKCS#12 with a self-signed RSA certificate valid in `[not_before, not_after]`.
pub fn pkcs12_valid_between(cn: &str, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Vec<u8> {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let mut name = X509Name::builder().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    name.append_entry_by_text("O", "Seal Test Org").unwrap();
    name.append_entry_by_text("C", "DE").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(0x5EA1).unwrap();
    builder
        .set_serial_number(&Asn1Integer::from_bn(&serial).unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(not_before.timestamp()).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after.timestamp()).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    Pkcs12::builder()
        .name(cn)
        .pkey(&key)
        .cert(&cert)
        .build2(PASSWORD)
        .unwrap()
        .to_der()
        .unwrap()
}

/// PKCS#12 valid for a year around [`signing_time`].
pub fn pkcs12(cn: &str) -> Vec<u8> {
    pkcs12_valid_between(cn, signing_time() - Duration::days(180), signing_time() + Duration::days(180))
}

/// Opaque PNG with a diagonal stroke.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| {
        if x == y {
            image::Rgb([0, 0, 128])
        } else {
            image::Rgb([255, 255, 255])
        }
    });
    encode_png(image::DynamicImage::ImageRgb8(image))
}

/// PNG with an alpha channel, exercising the soft-mask path.
pub fn transparent_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_fn(width, height, |x, _| image::Rgba([200, 0, 0, (x * 255 / width.max(1)) as u8]));
    encode_png(image::DynamicImage::ImageRgba8(image))
}

fn encode_png(image: image::DynamicImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
    out.into_inner()
}

/// Signing service pinned to [`signing_time`].
pub fn service() -> SigningService {
    SigningService::new().with_clock(Arc::new(FixedClock(signing_time())))
}

/// Request stamping page 1 of `pdf` with the given container.
pub fn request(name: &str, pdf: Vec<u8>, pkcs12: Vec<u8>) -> SigningRequest {
    SigningRequest::new(name, pdf, png(120, 40), pkcs12, PASSWORD)
        .with_canvas(CanvasSize::new(800.0, 1000.0))
        .with_placement(SignaturePlacement::new(1, 100.0, 800.0, 240.0, 100.0))
        .with_location("Berlin")
}

/// Index of the first occurrence of `needle` at or after `from`.
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Unsigned RFC 3161 TimeStampToken stating that `imprint` existed at `gen_time`.
pub fn timestamp_token(imprint: &[u8], gen_time: DateTime<Utc>) -> Vec<u8> {
    let info = TstInfo {
        version: TspVersion::V1,
        policy: ObjectIdentifier::new_unwrap("1.2.3.4.1"),
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: DigestAlgorithm::Sha256.oid(),
                parameters: None,
            },
            hashed_message: OctetString::new(imprint).unwrap(),
        },
        serial_number: Int::new(&[0x2A]).unwrap(),
        gen_time: GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(gen_time.timestamp() as u64))
            .unwrap(),
        accuracy: None,
        ordering: false,
        nonce: None,
        tsa: None,
        extensions: None,
    };
    let signed_data = SignedData {
        version: CmsVersion::V3,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4"),
            econtent: Some(Any::encode_from(&OctetString::new(info.to_der().unwrap()).unwrap()).unwrap()),
        },
        certificates: None,
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };
    ContentInfo {
        content_type: ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2"),
        content: Any::encode_from(&signed_data).unwrap(),
    }
    .to_der()
    .unwrap()
}
