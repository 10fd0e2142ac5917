//! CMS SignedData for detached PDF signatures.
//!
//! Building produces an `adbe.pkcs7.detached` blob: id-data content type
//! with no encapsulated content, one SignerInfo identified by issuer and
//! serial, signed attributes (contentType, messageDigest, signingTime) and
//! the full certificate chain. Parsing goes the other way for verification.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode, SliceReader};
use pkcs8::DecodePublicKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::RsaPublicKey;
use sha2::Sha256;
use signature::{SignatureEncoding, Signer, Verifier};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;
use x509_cert::Certificate;

use crate::error::SigningError;
use crate::signatures::certificate::CertificateBundle;
use crate::signatures::types::DigestAlgorithm;

/// id-signedData
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// id-data
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
/// contentType signed attribute
pub const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
/// messageDigest signed attribute
pub const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
/// signingTime signed attribute
pub const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
/// id-aa-timeStampToken unsigned attribute
pub const ID_AA_TIME_STAMP_TOKEN: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
/// rsaEncryption
pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// A SignerInfo under construction plus the certificates to embed.
#[derive(Debug, Clone)]
pub struct DetachedSignature {
    signer_info: SignerInfo,
    certificates: Vec<Certificate>,
}

impl DetachedSignature {
    /// Sign `content_digest` (SHA-256 of the byte ranges) with the bundle's key.
    pub fn sign(
        bundle: &CertificateBundle,
        content_digest: &[u8],
        signing_time: DateTime<Utc>,
    ) -> Result<Self, SigningError> {
        let certificates = bundle
            .certificate_chain
            .iter()
            .map(|der| Certificate::from_der(der))
            .collect::<der::Result<Vec<_>>>()
            .map_err(der_failure)?;
        let leaf = certificates.first().ok_or(SigningError::NoPrivateKey)?;

        let signed_attrs = SetOfVec::try_from(vec![
            attribute(ID_CONTENT_TYPE, Any::encode_from(&ID_DATA).map_err(der_failure)?)?,
            attribute(
                ID_MESSAGE_DIGEST,
                Any::encode_from(&OctetString::new(content_digest).map_err(der_failure)?)
                    .map_err(der_failure)?,
            )?,
            attribute(ID_SIGNING_TIME, encode_time(signing_time)?)?,
        ])
        .map_err(der_failure)?;

        // The signature covers the DER SET OF, not the [0] IMPLICIT form.
        let signed_attrs_der = signed_attrs.to_der().map_err(der_failure)?;
        let signing_key = SigningKey::<Sha256>::new(bundle.private_key().clone());
        let signature = signing_key
            .try_sign(&signed_attrs_der)
            .map_err(|e| SigningError::DigestFailure(e.to_string()))?;

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: leaf.tbs_certificate.issuer.clone(),
                serial_number: leaf.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: sha256_identifier(),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: RSA_ENCRYPTION,
                parameters: Some(Any::null()),
            },
            signature: OctetString::new(signature.to_vec()).map_err(der_failure)?,
            unsigned_attrs: None,
        };

        Ok(Self {
            signer_info,
            certificates,
        })
    }

    /// The raw RSA signature value (what a timestamp is requested over).
    pub fn signature_value(&self) -> &[u8] {
        self.signer_info.signature.as_bytes()
    }

    /// Embed an RFC 3161 TimeStampToken as an unsigned attribute.
    pub fn add_timestamp_token(&mut self, token_der: &[u8]) -> Result<(), SigningError> {
        let token = Any::from_der(token_der).map_err(der_failure)?;
        let attrs = SetOfVec::try_from(vec![attribute(ID_AA_TIME_STAMP_TOKEN, token)?]).map_err(der_failure)?;
        self.signer_info.unsigned_attrs = Some(attrs);
        Ok(())
    }

    /// DER-encoded ContentInfo wrapping the SignedData.
    pub fn to_der(&self) -> Result<Vec<u8>, SigningError> {
        let certificates = self
            .certificates
            .iter()
            .cloned()
            .map(CertificateChoices::Certificate)
            .collect::<Vec<_>>();

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::try_from(vec![sha256_identifier()]).map_err(der_failure)?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(certificates).map_err(der_failure)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![self.signer_info.clone()]).map_err(der_failure)?),
        };

        ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).map_err(der_failure)?,
        }
        .to_der()
        .map_err(der_failure)
    }
}

fn sha256_identifier() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: DigestAlgorithm::Sha256.oid(),
        parameters: None,
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute, SigningError> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value]).map_err(der_failure)?,
    })
}

/// UTCTime through 2049, GeneralizedTime after.
fn encode_time(at: DateTime<Utc>) -> Result<Any, SigningError> {
    let since_epoch = Duration::from_secs(at.timestamp().max(0) as u64);
    match UtcTime::from_unix_duration(since_epoch) {
        Ok(utc) => Any::encode_from(&utc),
        Err(_) => GeneralizedTime::from_unix_duration(since_epoch).and_then(|gt| Any::encode_from(&gt)),
    }
    .map_err(der_failure)
}

fn der_failure(e: der::Error) -> SigningError {
    SigningError::DigestFailure(format!("CMS encoding failed: {}", e))
}

/// The parts of a CMS signature needed for verification.
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Digest algorithm declared by the SignerInfo, if recognised
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Dotted OID of the declared digest algorithm
    pub digest_oid: String,
    /// DER SET OF the signed attributes, exactly as signed
    pub signed_attrs_der: Option<Vec<u8>>,
    /// Value of the messageDigest attribute
    pub message_digest: Option<Vec<u8>>,
    /// Value of the signingTime attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// RSA signature value
    pub signature: Vec<u8>,
    /// Embedded certificates (DER) in the order they appear
    pub certificates: Vec<Vec<u8>>,
    /// Index into `certificates` of the signer
    pub signer_index: Option<usize>,
    /// id-aa-timeStampToken value (a ContentInfo)
    pub timestamp_token: Option<Vec<u8>>,
}

impl ParsedSignature {
    /// DER of the signer certificate.
    pub fn signer_certificate(&self) -> Option<&[u8]> {
        self.signer_index
            .and_then(|i| self.certificates.get(i))
            .map(|c| c.as_slice())
    }
}

/// Decode a `/Contents` blob. Trailing zero padding is ignored.
pub fn parse_signed_data(blob: &[u8]) -> Result<ParsedSignature, String> {
    let mut reader = SliceReader::new(blob).map_err(|e| e.to_string())?;
    let content_info = ContentInfo::decode(&mut reader).map_err(|e| format!("not a CMS ContentInfo: {}", e))?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(format!("unexpected content type {}", content_info.content_type));
    }
    let content = content_info.content.to_der().map_err(|e| e.to_string())?;
    let signed_data = SignedData::from_der(&content).map_err(|e| format!("malformed SignedData: {}", e))?;

    let certificates: Vec<Certificate> = signed_data
        .certificates
        .as_ref()
        .map(|set| {
            set.0
                .iter()
                .filter_map(|choice| match choice {
                    CertificateChoices::Certificate(cert) => Some(cert.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let signer_info = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| "SignedData has no SignerInfo".to_string())?;

    let signer_index = match &signer_info.sid {
        SignerIdentifier::IssuerAndSerialNumber(isn) => certificates.iter().position(|cert| {
            cert.tbs_certificate.issuer == isn.issuer && cert.tbs_certificate.serial_number == isn.serial_number
        }),
        SignerIdentifier::SubjectKeyIdentifier(_) => None,
    }
    .or(if certificates.is_empty() { None } else { Some(0) });

    let mut message_digest = None;
    let mut signing_time = None;
    let signed_attrs_der = match &signer_info.signed_attrs {
        Some(attrs) => {
            for attr in attrs.iter() {
                let Some(value) = attr.values.iter().next() else {
                    continue;
                };
                let value_der = value.to_der().map_err(|e| e.to_string())?;
                if attr.oid == ID_MESSAGE_DIGEST {
                    let digest = OctetString::from_der(&value_der).map_err(|e| e.to_string())?;
                    message_digest = Some(digest.as_bytes().to_vec());
                } else if attr.oid == ID_SIGNING_TIME {
                    signing_time = Time::from_der(&value_der).ok().and_then(|t| unix_to_utc(t.to_unix_duration()));
                }
            }
            Some(attrs.to_der().map_err(|e| e.to_string())?)
        },
        None => None,
    };

    let timestamp_token = match &signer_info.unsigned_attrs {
        Some(attrs) => attrs
            .iter()
            .find(|attr| attr.oid == ID_AA_TIME_STAMP_TOKEN)
            .and_then(|attr| attr.values.iter().next())
            .map(|value| value.to_der())
            .transpose()
            .map_err(|e| e.to_string())?,
        None => None,
    };

    let certificates = certificates
        .iter()
        .map(|cert| cert.to_der())
        .collect::<der::Result<Vec<_>>>()
        .map_err(|e| e.to_string())?;

    Ok(ParsedSignature {
        digest_algorithm: DigestAlgorithm::from_oid(&signer_info.digest_alg.oid),
        digest_oid: signer_info.digest_alg.oid.to_string(),
        signed_attrs_der,
        message_digest,
        signing_time,
        signature: signer_info.signature.as_bytes().to_vec(),
        certificates,
        signer_index,
        timestamp_token,
    })
}

pub(crate) fn unix_to_utc(since_epoch: Duration) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(since_epoch.as_secs() as i64, since_epoch.subsec_nanos()).single()
}

/// Check an RSA PKCS#1 v1.5 signature with the key of a DER certificate.
pub fn verify_rsa(
    certificate_der: &[u8],
    algorithm: DigestAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<(), String> {
    let certificate = Certificate::from_der(certificate_der).map_err(|e| e.to_string())?;
    let spki_der = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| e.to_string())?;
    let public_key =
        RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| format!("signer key is not RSA: {}", e))?;
    let signature = Signature::try_from(signature).map_err(|e| e.to_string())?;

    let outcome = match algorithm {
        DigestAlgorithm::Sha1 => VerifyingKey::<sha1::Sha1>::new(public_key).verify(message, &signature),
        DigestAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(public_key).verify(message, &signature),
        DigestAlgorithm::Sha384 => VerifyingKey::<sha2::Sha384>::new(public_key).verify(message, &signature),
        DigestAlgorithm::Sha512 => VerifyingKey::<sha2::Sha512>::new(public_key).verify(message, &signature),
    };
    outcome.map_err(|_| "RSA signature does not verify".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::certificate::CertificateBundle;
    use chrono::TimeZone;
    use openssl::asn1::Asn1Time;
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Name, X509};
    use pkcs8::DecodePrivateKey;
    use rsa::RsaPrivateKey;

    fn bundle() -> CertificateBundle {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_text("CN", "CMS Test").unwrap();
        let name = name.build();
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(10).unwrap()).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build().to_der().unwrap();
        let private_key = RsaPrivateKey::from_pkcs8_der(&key.private_key_to_pkcs8().unwrap()).unwrap();
        CertificateBundle::from_parts(private_key, vec![cert]).unwrap()
    }

    #[test]
    fn test_build_then_parse_detached_signature() {
        let bundle = bundle();
        let digest = DigestAlgorithm::Sha256.digest(&[b"signed content".as_slice()]);
        let time = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap();
        let der = DetachedSignature::sign(&bundle, &digest, time).unwrap().to_der().unwrap();

        let mut padded = der.clone();
        padded.extend_from_slice(&[0u8; 64]);
        let parsed = parse_signed_data(&padded).unwrap();

        assert_eq!(parsed.digest_algorithm, Some(DigestAlgorithm::Sha256));
        assert_eq!(parsed.message_digest.as_deref(), Some(digest.as_slice()));
        assert_eq!(parsed.signing_time, Some(time));
        assert_eq!(parsed.signer_index, Some(0));
        assert!(parsed.timestamp_token.is_none());

        let attrs = parsed.signed_attrs_der.as_ref().unwrap();
        assert_eq!(attrs[0], 0x31);
        verify_rsa(
            parsed.signer_certificate().unwrap(),
            DigestAlgorithm::Sha256,
            attrs,
            &parsed.signature,
        )
        .unwrap();
    }

    #[test]
    fn test_modified_attributes_fail_verification() {
        let bundle = bundle();
        let digest = DigestAlgorithm::Sha256.digest(&[b"abc".as_slice()]);
        let der = DetachedSignature::sign(&bundle, &digest, Utc::now()).unwrap().to_der().unwrap();
        let parsed = parse_signed_data(&der).unwrap();

        let mut attrs = parsed.signed_attrs_der.clone().unwrap();
        let last = attrs.len() - 1;
        attrs[last] ^= 0x01;
        assert!(verify_rsa(&parsed.certificates[0], DigestAlgorithm::Sha256, &attrs, &parsed.signature).is_err());
    }

    #[test]
    fn test_timestamp_token_becomes_unsigned_attribute() {
        let bundle = bundle();
        let mut signature = DetachedSignature::sign(&bundle, &[0u8; 32], Utc::now()).unwrap();
        assert_eq!(signature.signature_value().len(), 256);

        // Any DER value stands in for the token here.
        let fake_token = ContentInfo {
            content_type: ID_DATA,
            content: Any::encode_from(&OctetString::new(vec![1, 2, 3]).unwrap()).unwrap(),
        }
        .to_der()
        .unwrap();
        signature.add_timestamp_token(&fake_token).unwrap();

        let parsed = parse_signed_data(&signature.to_der().unwrap()).unwrap();
        assert_eq!(parsed.timestamp_token, Some(fake_token));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_signed_data(&[0x30, 0x03, 0x02, 0x01, 0x00]).is_err());
        assert!(parse_signed_data(b"").is_err());
    }
}
