//! RFC 3161 timestamp client.
//!
//! The signer asks a [`TimestampProvider`] for a token over the digest of its
//! signature value. [`TimestampClient`] is the HTTP implementation; the TSA
//! flavour is chosen once through [`TsaProfile`] and validated by
//! [`TsaConfig::resolve`] before any document is signed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use cmpv2::status::PkiStatus;
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::asn1::{Int, ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use spki::AlgorithmIdentifierOwned;
use x509_tsp::{MessageImprint, TimeStampReq, TimeStampResp, TspVersion, TstInfo};

use crate::error::TimestampError;
use crate::signatures::cms::unix_to_utc;
use crate::signatures::types::DigestAlgorithm;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Obtains timestamp tokens for a digest.
pub trait TimestampProvider: Send + Sync {
    /// Return a DER TimeStampToken (a CMS ContentInfo) over a SHA-256 `digest`.
    fn timestamp(&self, digest: &[u8]) -> Result<Vec<u8>, TimestampError>;
}

/// Which kind of timestamp authority is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TsaProfile {
    /// No timestamping
    #[default]
    None,
    /// Plain RFC 3161 endpoint, no authentication
    Basic,
    /// Government CA endpoint: HTTP basic credentials, optional policy OID
    GovCa,
}

/// Timestamp authority settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TsaConfig {
    /// TSA flavour
    pub profile: TsaProfile,
    /// Endpoint URL
    pub url: Option<String>,
    /// Basic-auth user (GovCa)
    pub username: Option<String>,
    /// Basic-auth password (GovCa)
    pub password: Option<String>,
    /// Requested policy OID in dotted form (GovCa)
    pub policy_oid: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TsaConfig {
    fn default() -> Self {
        Self {
            profile: TsaProfile::None,
            url: None,
            username: None,
            password: None,
            policy_oid: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TsaConfig {
    /// Plain TSA at `url`.
    pub fn basic(url: impl Into<String>) -> Self {
        Self {
            profile: TsaProfile::Basic,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Authenticated government TSA at `url`.
    pub fn gov_ca(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            profile: TsaProfile::GovCa,
            url: Some(url.into()),
            username: Some(username.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }

    /// Request a specific policy.
    pub fn with_policy_oid(mut self, oid: impl Into<String>) -> Self {
        self.policy_oid = Some(oid.into());
        self
    }

    /// Change the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Validate the profile and build a client, or `None` when disabled.
    pub fn resolve(&self) -> Result<Option<TimestampClient>, TimestampError> {
        if self.profile == TsaProfile::None {
            return Ok(None);
        }
        let url = self
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| TimestampError::NotConfigured(format!("{:?} profile needs a URL", self.profile)))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TimestampError::NotConfigured(format!("unsupported TSA URL {}", url)));
        }

        let credentials = match self.profile {
            TsaProfile::GovCa => {
                let user = self.username.clone().filter(|u| !u.is_empty());
                let password = self.password.clone();
                match (user, password) {
                    (Some(user), Some(password)) => Some((user, password)),
                    _ => {
                        return Err(TimestampError::NotConfigured(
                            "GovCa profile requires username and password".to_string(),
                        ))
                    },
                }
            },
            _ => None,
        };

        let policy = match (self.profile, self.policy_oid.as_deref()) {
            (TsaProfile::GovCa, Some(oid)) => Some(
                ObjectIdentifier::new(oid)
                    .map_err(|e| TimestampError::NotConfigured(format!("bad policy OID {}: {}", oid, e)))?,
            ),
            _ => None,
        };

        TimestampClient::build(url.to_string(), credentials, policy, Duration::from_secs(self.timeout_secs))
            .map(Some)
    }
}

/// HTTP RFC 3161 client.
pub struct TimestampClient {
    url: String,
    credentials: Option<(String, String)>,
    policy: Option<ObjectIdentifier>,
    http: reqwest::blocking::Client,
}

impl std::fmt::Debug for TimestampClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampClient")
            .field("url", &self.url)
            .field("authenticated", &self.credentials.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}

impl TimestampClient {
    /// Build a client from a resolved configuration.
    pub fn new(config: &TsaConfig) -> Result<Self, TimestampError> {
        config
            .resolve()?
            .ok_or_else(|| TimestampError::NotConfigured("timestamping is disabled".to_string()))
    }

    fn build(
        url: String,
        credentials: Option<(String, String)>,
        policy: Option<ObjectIdentifier>,
        timeout: Duration,
    ) -> Result<Self, TimestampError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdf-seal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TimestampError::Transport(e.to_string()))?;
        Ok(Self {
            url,
            credentials,
            policy,
            http,
        })
    }

    /// TSA endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TimestampProvider for TimestampClient {
    fn timestamp(&self, digest: &[u8]) -> Result<Vec<u8>, TimestampError> {
        let request = build_request(digest, self.policy)?;

        let mut post = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/timestamp-query")
            .body(request);
        if let Some((user, password)) = &self.credentials {
            post = post.basic_auth(user, Some(password));
        }

        let response = post
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| TimestampError::Transport(e.to_string()))?;
        let body = response
            .bytes()
            .map_err(|e| TimestampError::Transport(e.to_string()))?;

        let token = token_from_response(&body)?;
        log::debug!("TSA {} returned a {} byte token", self.url, token.len());
        Ok(token)
    }
}

/// DER TimeStampReq for a SHA-256 digest with a random positive nonce.
pub fn build_request(digest: &[u8], policy: Option<ObjectIdentifier>) -> Result<Vec<u8>, TimestampError> {
    let malformed = |e: der::Error| TimestampError::Malformed(e.to_string());

    let mut nonce = [0u8; 8];
    rand::rng().fill_bytes(&mut nonce);
    nonce[0] = (nonce[0] & 0x7F) | 0x01;

    TimeStampReq {
        version: TspVersion::V1,
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: DigestAlgorithm::Sha256.oid(),
                parameters: None,
            },
            hashed_message: OctetString::new(digest).map_err(malformed)?,
        },
        req_policy: policy,
        nonce: Some(Int::new(&nonce).map_err(malformed)?),
        cert_req: true,
        extensions: None,
    }
    .to_der()
    .map_err(malformed)
}

/// Accept granted / grantedWithMods responses that carry a token.
pub fn token_from_response(body: &[u8]) -> Result<Vec<u8>, TimestampError> {
    let response = TimeStampResp::from_der(body).map_err(|e| TimestampError::Malformed(e.to_string()))?;
    if !matches!(response.status.status, PkiStatus::Accepted | PkiStatus::GrantedWithMods) {
        return Err(TimestampError::Rejected(format!("{:?}", response.status.status)));
    }
    let token = response
        .time_stamp_token
        .ok_or_else(|| TimestampError::Malformed("granted response without token".to_string()))?;
    token.to_der().map_err(|e| TimestampError::Malformed(e.to_string()))
}

fn tst_info(token_der: &[u8]) -> Option<TstInfo> {
    let content_info = ContentInfo::from_der(token_der).ok()?;
    let signed = SignedData::from_der(&content_info.content.to_der().ok()?).ok()?;
    let econtent = signed.encap_content_info.econtent?;
    let octets = OctetString::from_der(&econtent.to_der().ok()?).ok()?;
    TstInfo::from_der(octets.as_bytes()).ok()
}

/// The genTime of a TimeStampToken.
pub fn token_time(token_der: &[u8]) -> Option<DateTime<Utc>> {
    tst_info(token_der).and_then(|info| unix_to_utc(info.gen_time.to_unix_duration()))
}

/// True when the token's messageImprint is the digest of `signature_value`.
///
/// A token that fails this check was issued for some other signature and
/// says nothing about when this one was made.
pub fn token_covers(token_der: &[u8], signature_value: &[u8]) -> bool {
    let Some(info) = tst_info(token_der) else {
        return false;
    };
    let imprint = &info.message_imprint;
    DigestAlgorithm::from_oid(&imprint.hash_algorithm.oid)
        .is_some_and(|algorithm| algorithm.digest(&[signature_value]) == imprint.hashed_message.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_profile_resolves_to_nothing() {
        assert!(TsaConfig::default().resolve().unwrap().is_none());
    }

    #[test]
    fn test_basic_profile_needs_url() {
        let config = TsaConfig {
            profile: TsaProfile::Basic,
            ..TsaConfig::default()
        };
        assert!(matches!(config.resolve(), Err(TimestampError::NotConfigured(_))));
        assert!(TsaConfig::basic("ftp://tsa").resolve().is_err());
        let client = TsaConfig::basic("http://tsa.example/tsr").resolve().unwrap().unwrap();
        assert_eq!(client.url(), "http://tsa.example/tsr");
    }

    #[test]
    fn test_gov_ca_requires_credentials() {
        let mut config = TsaConfig::gov_ca("https://tsa.gov.example", "user", "pw");
        assert!(config.resolve().unwrap().is_some());
        config.password = None;
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_gov_ca_policy_oid_validated() {
        let config = TsaConfig::gov_ca("https://tsa.gov.example", "u", "p").with_policy_oid("not-an-oid");
        assert!(config.resolve().is_err());
        let config = TsaConfig::gov_ca("https://tsa.gov.example", "u", "p").with_policy_oid("1.2.3.4.1");
        let client = config.resolve().unwrap().unwrap();
        assert_eq!(client.policy.map(|p| p.to_string()), Some("1.2.3.4.1".to_string()));
    }

    #[test]
    fn test_request_encodes_imprint_and_positive_nonce() {
        let digest = [7u8; 32];
        let der = build_request(&digest, None).unwrap();
        let request = TimeStampReq::from_der(&der).unwrap();
        assert_eq!(request.message_imprint.hashed_message.as_bytes(), &digest);
        assert!(request.cert_req);
        let nonce = request.nonce.unwrap();
        assert_eq!(nonce.as_bytes()[0] & 0x80, 0);
    }

    #[test]
    fn test_garbage_response_is_malformed() {
        assert!(matches!(token_from_response(b"<html>"), Err(TimestampError::Malformed(_))));
    }

    #[test]
    fn test_rejection_status_reported() {
        // TimeStampResp { status: PKIStatusInfo { status: rejection (2) } }
        let body = [0x30, 0x05, 0x30, 0x03, 0x02, 0x01, 0x02];
        assert!(matches!(token_from_response(&body), Err(TimestampError::Rejected(_))));
    }

    #[test]
    fn test_token_time_of_garbage() {
        assert!(token_time(b"garbage").is_none());
        assert!(!token_covers(b"garbage", &[1, 2, 3]));
    }
}
