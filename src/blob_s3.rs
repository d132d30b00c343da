//! S3-compatible [`BlobStore`].
//!
//! Objects are written with signed `PUT` requests under
//! `<prefix>/videos/` and `<prefix>/references/`. The locator handed back
//! for each upload is a presigned `GET` URL (7 days by default), so the
//! analysis step and browsers can fetch it without credentials.
//!
//! Requests are signed with AWS Signature Version 4 using only `hmac` and
//! `sha2`. A custom `endpoint_url` switches to path-style addressing for
//! MinIO, LocalStack, and similar services.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use refinery_eye_core::models::{AssetRole, Blob, UploadedAsset};
use refinery_eye_core::store::{unique_object_name, BlobStore};
use refinery_eye_core::{InspectError, Result};

use crate::config::S3StorageConfig;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| InspectError::Config(format!("{} environment variable not set", name)))
        };
        Ok(Self {
            access_key_id: var("AWS_ACCESS_KEY_ID")?,
            secret_access_key: var("AWS_SECRET_ACCESS_KEY")?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

pub struct S3BlobStore {
    config: S3StorageConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3BlobStore {
    pub fn new(config: S3StorageConfig, creds: AwsCredentials) -> Self {
        Self {
            config,
            creds,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &S3StorageConfig) -> Result<Self> {
        Ok(Self::new(config.clone(), AwsCredentials::from_env()?))
    }

    /// Full object key for a storage path.
    fn object_key(&self, storage_path: &str) -> String {
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            storage_path.to_string()
        } else {
            format!("{}/{}", prefix, storage_path)
        }
    }

    /// `(scheme, host, canonical uri)` for an object key.
    fn endpoint(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.config.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let uri = format!("/{}/{}", uri_encode(&self.config.bucket), encoded_key);
                (scheme.to_string(), host, uri)
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.config.bucket, self.config.region),
                format!("/{}", encoded_key),
            ),
        }
    }

    /// Object key behind a locator this store handed out.
    ///
    /// Accepts a presigned URL on this store's own endpoint and bucket, or a
    /// bare storage path. The key must sit under `<prefix>/videos/` or
    /// `<prefix>/references/`; anything else is `None`.
    fn key_from_locator(&self, locator: &str) -> Option<String> {
        let key = match locator.split_once("://") {
            Some((scheme, rest)) => {
                let (own_scheme, own_host, root) = self.endpoint("");
                let (host, path) = rest.split_once('/')?;
                if !scheme.eq_ignore_ascii_case(&own_scheme) || !host.eq_ignore_ascii_case(&own_host) {
                    return None;
                }
                let path = format!("/{}", strip_query(path));
                path.strip_prefix(root.as_str())?
                    .split('/')
                    .map(uri_decode)
                    .collect::<Option<Vec<_>>>()?
                    .join("/")
            }
            None => self.object_key(locator),
        };

        let own_prefix = self.object_key("");
        let rel = key.strip_prefix(own_prefix.as_str())?;
        let in_role_dir = [AssetRole::Video, AssetRole::Reference]
            .iter()
            .any(|role| rel.starts_with(&format!("{}/", role.dir())));
        let clean = rel
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..");
        (in_role_dir && clean).then_some(key)
    }

    /// Build a header-signed request for `method` on `key`.
    fn signed(&self, method: reqwest::Method, key: &str, body: Option<&[u8]>) -> reqwest::RequestBuilder {
        let (scheme, host, uri) = self.endpoint(key);
        let payload_hash = hex_sha256(body.unwrap_or(b""));
        let now = Utc::now();
        let authorization = authorization_header(
            &self.creds,
            &self.config.region,
            method.as_str(),
            &host,
            &uri,
            &payload_hash,
            now,
        );

        let mut req = self
            .client
            .request(method, format!("{}://{}{}", scheme, host, uri))
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", now.format("%Y%m%dT%H%M%SZ").to_string());
        if let Some(token) = &self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        req
    }

    /// Presigned GET URL for `key`, valid for the configured expiry.
    pub fn presign_get(&self, key: &str, now: DateTime<Utc>) -> String {
        let (scheme, host, uri) = self.endpoint(key);
        let query = presigned_query(
            &self.creds,
            &self.config.region,
            &host,
            &uri,
            self.config.url_expiry_secs,
            now,
        );
        format!("{}://{}{}?{}", scheme, host, uri, query)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn backend(&self) -> &str {
        "s3"
    }

    async fn store(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
        mime_type: &str,
        role: AssetRole,
    ) -> Result<UploadedAsset> {
        let name = unique_object_name(original_name, Utc::now().timestamp_millis(), rand::random());
        let storage_path = format!("{}/{}", role.dir(), name);
        let key = self.object_key(&storage_path);
        let size = bytes.len() as u64;

        let resp = self
            .signed(reqwest::Method::PUT, &key, Some(&bytes))
            .header("Content-Type", mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| InspectError::io(format!("failed to put s3://{}/{}: {}", self.config.bucket, key, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(InspectError::io(format!(
                "S3 PutObject failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        tracing::debug!(bucket = %self.config.bucket, key = %key, size, "stored blob");

        Ok(UploadedAsset {
            locator: self.presign_get(&key, Utc::now()),
            storage_path,
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size,
        })
    }

    async fn fetch(&self, locator: &str) -> Result<Blob> {
        // Always a signed GET on our own key, never a request to the locator as given.
        let key = self
            .key_from_locator(locator)
            .ok_or_else(|| InspectError::not_found("blob", strip_query(locator)))?;

        let resp = self
            .signed(reqwest::Method::GET, &key, None)
            .send()
            .await
            .map_err(|e| InspectError::io(format!("failed to fetch blob: {}", e)))?;

        match resp.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::FORBIDDEN => {
                return Err(InspectError::not_found("blob", strip_query(locator)))
            }
            s => {
                return Err(InspectError::io(format!(
                    "S3 GetObject failed (HTTP {}) for '{}'",
                    s,
                    strip_query(locator)
                )))
            }
        }

        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| {
                mime_guess::from_path(strip_query(locator))
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| InspectError::io(format!("failed to read blob body: {}", e)))?;

        Ok(Blob {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }

    async fn delete(&self, storage_path: &str) -> Result<()> {
        let key = self.object_key(storage_path);
        let resp = self
            .signed(reqwest::Method::DELETE, &key, None)
            .send()
            .await
            .map_err(|e| InspectError::io(format!("failed to delete s3://{}/{}: {}", self.config.bucket, key, e)))?;

        // S3 answers 204 for missing keys too.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(InspectError::io(format!(
                "S3 DeleteObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            )));
        }
        Ok(())
    }
}

fn strip_query(locator: &str) -> &str {
    locator.split(['?', '#']).next().unwrap_or(locator)
}

// ============ AWS SigV4 ============

fn credential_scope(date_stamp: &str, region: &str) -> String {
    format!("{}/{}/s3/aws4_request", date_stamp, region)
}

fn sign(creds: &AwsCredentials, region: &str, now: DateTime<Utc>, canonical_request: &str) -> String {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope(&date_stamp, region),
        hex_sha256(canonical_request.as_bytes())
    );
    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()))
}

/// `Authorization` header value for a header-signed request.
fn authorization_header(
    creds: &AwsCredentials,
    region: &str,
    method: &str,
    host: &str,
    uri: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> String {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, uri, canonical_headers, signed_headers, payload_hash
    );
    let signature = sign(creds, region, now, &canonical_request);

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id,
        credential_scope(&now.format("%Y%m%d").to_string(), region),
        signed_headers,
        signature
    )
}

/// Query string (including `X-Amz-Signature`) for a presigned GET.
fn presigned_query(
    creds: &AwsCredentials,
    region: &str,
    host: &str,
    uri: &str,
    expires_secs: u64,
    now: DateTime<Utc>,
) -> String {
    let date_stamp = now.format("%Y%m%d").to_string();
    let mut params = vec![
        ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{}", creds.access_key_id, credential_scope(&date_stamp, region)),
        ),
        ("X-Amz-Date".to_string(), now.format("%Y%m%dT%H%M%SZ").to_string()),
        ("X-Amz-Expires".to_string(), expires_secs.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    if let Some(token) = &creds.session_token {
        params.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }
    params.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_query = params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
        uri, canonical_query, host, UNSIGNED_PAYLOAD
    );
    let signature = sign(creds, region, now, &canonical_request);

    format!("{}&X-Amz-Signature={}", canonical_query, signature)
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char)
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

/// Inverse of [`uri_encode`]; `None` on a bad escape or non-UTF-8 result.
fn uri_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store(endpoint: Option<&str>) -> S3BlobStore {
        S3BlobStore::new(
            S3StorageConfig {
                bucket: "refinery-media".into(),
                region: "ap-south-1".into(),
                prefix: "/eye/".into(),
                endpoint_url: endpoint.map(str::to_string),
                url_expiry_secs: 604_800,
            },
            AwsCredentials {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
                session_token: None,
            },
        )
    }

    #[test]
    fn signing_key_matches_aws_reference() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn keys_carry_prefix() {
        let s = store(None);
        assert_eq!(s.object_key("videos/1-a.mp4"), "eye/videos/1-a.mp4");
    }

    #[test]
    fn presigned_url_has_expected_shape() {
        let s = store(None);
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let url = s.presign_get("eye/videos/1-a b.mp4", now);
        assert!(url.starts_with(
            "https://refinery-media.s3.ap-south-1.amazonaws.com/eye/videos/1-a%20b.mp4?"
        ));
        assert!(url.contains("X-Amz-Expires=604800"));
        assert!(url.contains("X-Amz-Date=20260102T030405Z"));
        assert!(url.contains("X-Amz-Credential=AKIDEXAMPLE%2F20260102%2Fap-south-1%2Fs3%2Faws4_request"));
        let sig = url.rsplit("X-Amz-Signature=").next().unwrap();
        assert_eq!(sig.len(), 64);
        // Deterministic for a fixed clock.
        assert_eq!(url, s.presign_get("eye/videos/1-a b.mp4", now));
    }

    #[test]
    fn custom_endpoint_uses_path_style() {
        let s = store(Some("http://localhost:9000/"));
        let (scheme, host, uri) = s.endpoint("eye/references/x.pdf");
        assert_eq!(scheme, "http");
        assert_eq!(host, "localhost:9000");
        assert_eq!(uri, "/refinery-media/eye/references/x.pdf");
    }

    #[test]
    fn own_presigned_urls_map_back_to_keys() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        for endpoint in [None, Some("http://localhost:9000")] {
            let s = store(endpoint);
            let key = "eye/videos/1-0000abcd-walk through.mp4";
            let url = s.presign_get(key, now);
            assert_eq!(s.key_from_locator(&url).as_deref(), Some(key));
        }
        let s = store(None);
        assert_eq!(
            s.key_from_locator("references/2-a.pdf").as_deref(),
            Some("eye/references/2-a.pdf")
        );
    }

    #[test]
    fn locators_outside_the_bucket_are_refused() {
        let s = store(Some("http://localhost:9000"));
        for locator in [
            "http://169.254.169.254/latest/meta-data/",
            "http://127.0.0.1:9/refinery-media/eye/videos/1-a.mp4",
            "https://localhost:9000/refinery-media/eye/videos/1-a.mp4",
            "http://localhost:9000/other-bucket/eye/videos/1-a.mp4",
            "http://localhost:9000/refinery-media/other/videos/1-a.mp4",
            "http://localhost:9000/refinery-media/eye/secrets/1-a.txt",
            "http://localhost:9000/refinery-media/eye/videos/../../x",
            "http://user@localhost:9000/refinery-media/eye/videos/1-a.mp4",
            "videos/../../secrets",
        ] {
            assert_eq!(s.key_from_locator(locator), None, "{}", locator);
        }
    }

    #[tokio::test]
    async fn fetch_of_a_foreign_url_is_not_found_without_a_request() {
        let s = store(None);
        let err = s
            .fetch("http://127.0.0.1:9/latest/meta-data?token=x")
            .await
            .unwrap_err();
        match err {
            InspectError::NotFound { entity, id } => {
                assert_eq!(entity, "blob");
                assert_eq!(id, "http://127.0.0.1:9/latest/meta-data");
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
