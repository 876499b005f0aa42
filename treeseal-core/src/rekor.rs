//! Rekor transparency log client
//!
//! Only the two read-only calls the keyless verifier needs: search the index
//! by artifact digest, then fetch one entry. Nothing is cached; every
//! verification goes back to the log.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{IntegrityError, Result};

/// A log entry reduced to what verification consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub uuid: String,
    /// Decoded entry body, kept verbatim for diagnostics
    pub body: String,
    /// Signature bytes recorded in the entry
    pub signature: Vec<u8>,
    /// Signing certificate recorded in the entry, PEM encoded
    pub certificate_pem: String,
}

/// Read access to a transparency log
#[async_trait]
pub trait TransparencyLog: Send + Sync {
    /// UUIDs of entries recorded for a SHA-256 artifact digest (hex), in log order
    async fn search_by_digest(&self, digest_hex: &str) -> Result<Vec<String>>;

    /// Fetch and decode a single entry
    async fn fetch_entry(&self, uuid: &str) -> Result<LogEntry>;
}

#[derive(Debug, Serialize)]
struct IndexQuery<'a> {
    hash: &'a str,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    body: String,
}

#[derive(Debug, Deserialize)]
struct EntryBody {
    spec: EntrySpec,
}

#[derive(Debug, Deserialize)]
struct EntrySpec {
    signature: EntrySignature,
}

#[derive(Debug, Deserialize)]
struct EntrySignature {
    content: String,
    #[serde(rename = "publicKey")]
    public_key: EntryPublicKey,
}

#[derive(Debug, Deserialize)]
struct EntryPublicKey {
    content: String,
}

/// HTTP client for a Rekor instance
pub struct RekorClient {
    client: reqwest::Client,
    base_url: String,
}

impl RekorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntegrityError::ToolUnavailable {
                tool: "rekor client".to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TransparencyLog for RekorClient {
    async fn search_by_digest(&self, digest_hex: &str) -> Result<Vec<String>> {
        let hash = format!("sha256:{digest_hex}");
        let fail = |reason: String| IntegrityError::LogLookupFailed {
            query: hash.clone(),
            reason,
        };

        let url = format!("{}/api/v1/index/retrieve", self.base_url);
        debug!("Searching {} for {}", url, hash);

        let response = self
            .client
            .post(&url)
            .json(&IndexQuery { hash: &hash })
            .send()
            .await
            .map_err(|e| fail(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Rekor index search error: {} - {}", status, body);
            return Err(fail(format!("{status} - {body}")));
        }

        let uuids: Vec<String> = response
            .json()
            .await
            .map_err(|e| fail(format!("unexpected index response: {e}")))?;
        debug!("Rekor returned {} entries for {}", uuids.len(), hash);
        Ok(uuids)
    }

    async fn fetch_entry(&self, uuid: &str) -> Result<LogEntry> {
        let fail = |reason: String| IntegrityError::LogLookupFailed {
            query: format!("entry {uuid}"),
            reason,
        };

        let url = format!("{}/api/v1/log/entries/{}", self.base_url, uuid);
        debug!("Fetching Rekor entry {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| fail(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Rekor entry fetch error: {} - {}", status, body);
            return Err(fail(format!("{status} - {body}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| fail(format!("failed to read response: {e}")))?;
        decode_entry(uuid, &text)
    }
}

/// Decode a `GET /api/v1/log/entries/{uuid}` response
///
/// The response maps the entry UUID to the entry. Some deployments key the
/// map by a longer entry ID than the one searched for, so a single entry under
/// a different key is accepted too.
pub fn decode_entry(uuid: &str, response: &str) -> Result<LogEntry> {
    let fail = |reason: String| IntegrityError::LogLookupFailed {
        query: format!("entry {uuid}"),
        reason,
    };

    let mut entries: HashMap<String, RawEntry> =
        serde_json::from_str(response).map_err(|e| fail(format!("malformed entry response: {e}")))?;

    let raw = match entries.remove(uuid) {
        Some(raw) => raw,
        None if entries.len() == 1 => entries
            .into_values()
            .next()
            .ok_or_else(|| fail("response contains no entries".to_string()))?,
        None if entries.is_empty() => return Err(fail("response contains no entries".to_string())),
        None => {
            return Err(fail(format!(
                "response holds {} entries and none is keyed {uuid}",
                entries.len()
            )))
        }
    };

    let body_bytes = STANDARD
        .decode(raw.body.trim())
        .map_err(|e| fail(format!("entry body is not base64: {e}")))?;
    let body = String::from_utf8(body_bytes).map_err(|e| fail(format!("entry body is not UTF-8: {e}")))?;

    let parsed: EntryBody = serde_json::from_str(&body)
        .map_err(|e| fail(format!("entry body lacks spec.signature: {e}\n{body}")))?;

    let signature = STANDARD
        .decode(parsed.spec.signature.content.trim())
        .map_err(|e| fail(format!("signature content is not base64: {e}")))?;
    let cert_bytes = STANDARD
        .decode(parsed.spec.signature.public_key.content.trim())
        .map_err(|e| fail(format!("public key content is not base64: {e}")))?;
    let certificate_pem =
        String::from_utf8(cert_bytes).map_err(|e| fail(format!("certificate is not UTF-8 PEM: {e}")))?;

    Ok(LogEntry {
        uuid: uuid.to_string(),
        body,
        signature,
        certificate_pem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entry_response(key: &str, signature: &[u8], cert_pem: &str) -> String {
        let body = json!({
            "apiVersion": "0.0.1",
            "kind": "hashedrekord",
            "spec": {
                "data": { "hash": { "algorithm": "sha256", "value": "00" } },
                "signature": {
                    "content": STANDARD.encode(signature),
                    "publicKey": { "content": STANDARD.encode(cert_pem) }
                }
            }
        });
        json!({
            key: {
                "body": STANDARD.encode(body.to_string()),
                "integratedTime": 1640000000,
                "logIndex": 1
            }
        })
        .to_string()
    }

    #[test]
    fn test_decode_entry_extracts_signature_and_certificate() {
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        let response = entry_response("abc123", b"sig-bytes", pem);

        let entry = decode_entry("abc123", &response).unwrap();
        assert_eq!(entry.uuid, "abc123");
        assert_eq!(entry.signature, b"sig-bytes".to_vec());
        assert_eq!(entry.certificate_pem, pem);
        assert!(entry.body.contains("hashedrekord"));
    }

    #[test]
    fn test_decode_entry_accepts_differently_keyed_single_entry() {
        let response = entry_response("24296fb24b8ad77aabc123", b"sig", "pem");
        let entry = decode_entry("abc123", &response).unwrap();
        assert_eq!(entry.signature, b"sig".to_vec());
    }

    #[test]
    fn test_decode_entry_rejects_several_unmatched_entries() {
        let first: serde_json::Value =
            serde_json::from_str(&entry_response("aaa", b"one", "pem")).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&entry_response("bbb", b"two", "pem")).unwrap();
        let response = json!({ "aaa": first["aaa"], "bbb": second["bbb"] }).to_string();

        let err = decode_entry("abc123", &response).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LogLookupFailed);
        assert!(err.to_string().contains("2 entries"));

        let entry = decode_entry("bbb", &response).unwrap();
        assert_eq!(entry.signature, b"two".to_vec());
    }

    #[test]
    fn test_decode_entry_rejects_garbage() {
        for response in [
            "not json".to_string(),
            "{}".to_string(),
            json!({"abc": {"body": "!!!"}}).to_string(),
            json!({"abc": {"body": STANDARD.encode("{\"spec\":{}}")}}).to_string(),
        ] {
            let err = decode_entry("abc", &response).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::LogLookupFailed, "response: {response}");
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = RekorClient::new("http://rekor.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://rekor.local");
    }

    #[tokio::test]
    async fn test_unreachable_log_is_lookup_failure() {
        let client = RekorClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.search_by_digest(&"a".repeat(64)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LogLookupFailed);
        assert!(err.to_string().contains("sha256:"));
    }
}
