//! HTTP Signature implementation for `ActivityPub`.
//!
//! Implements draft-cavage-http-signatures with the fixed signed-header set
//! `(request-target) host date content-type`. Verification returns a plain
//! `bool`: malformed input is a validation failure, not a programming error.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use postbox_common::{AppError, AppResult, parse_private_key, parse_public_key};
use rsa::{
    RsaPrivateKey,
    pkcs1v15::{SigningKey, VerifyingKey},
};
use sha2::Sha256;
use signature::{SignatureEncoding, Signer, Verifier};
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

/// Headers covered by every signature this server produces.
pub const SIGNED_HEADERS: [&str; 4] = ["(request-target)", "host", "date", "content-type"];

/// The only signature algorithm this server accepts or produces.
pub const ALGORITHM: &str = "rsa-sha256";

/// Parsed `Signature` header components.
#[derive(Debug, Clone)]
pub struct SignatureComponents {
    pub key_id: String,
    pub algorithm: String,
    pub headers: Vec<String>,
    pub signature: String,
}

/// HTTP Signature signer for outgoing requests.
pub struct HttpSigner {
    private_key: RsaPrivateKey,
    key_id: String,
}

impl HttpSigner {
    /// Create a signer from a PKCS#8 PEM private key.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] when the key does not parse.
    pub fn new(private_key_pem: &str, key_id: String) -> AppResult<Self> {
        let private_key = parse_private_key(private_key_pem)?;
        Ok(Self {
            private_key,
            key_id,
        })
    }

    /// Sign a POST to `url` and return the headers to attach, as
    /// `(name, value)` pairs: `Host`, `Date`, `Content-Type`, `Signature`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Federation`] for a URL without a host and
    /// [`AppError::Internal`] when signing fails.
    pub fn sign_request(
        &self,
        method: &str,
        url: &Url,
        content_type: &str,
    ) -> AppResult<Vec<(String, String)>> {
        let host = url
            .host_str()
            .ok_or_else(|| AppError::Federation(format!("No host in URL: {url}")))?;
        let query = url.query().map_or(String::new(), |q| format!("?{q}"));
        let request_target = format!("{} {}{query}", method.to_lowercase(), url.path());
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let signing_string = build_signing_string(
            &SIGNED_HEADERS.map(String::from),
            &request_target,
            &HashMap::from([
                ("host".to_string(), host.to_string()),
                ("date".to_string(), date.clone()),
                ("content-type".to_string(), content_type.to_string()),
            ]),
        )
        .ok_or_else(|| AppError::Internal("Incomplete signing string".to_string()))?;

        debug!(signing_string = %signing_string, "Signing string");

        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature_bytes = signing_key
            .try_sign(signing_string.as_bytes())
            .map_err(|e| AppError::Internal(format!("Signing failed: {e}")))?;
        let signature = BASE64.encode(signature_bytes.to_bytes());

        let signature_header = format!(
            "keyId=\"{}\",algorithm=\"{ALGORITHM}\",headers=\"{}\",signature=\"{signature}\"",
            self.key_id,
            SIGNED_HEADERS.join(" "),
        );

        Ok(vec![
            ("Host".to_string(), host.to_string()),
            ("Date".to_string(), date),
            ("Content-Type".to_string(), content_type.to_string()),
            ("Signature".to_string(), signature_header),
        ])
    }
}

/// HTTP Signature verifier for incoming requests.
pub struct HttpVerifier;

impl HttpVerifier {
    /// Parse a `Signature` header into components.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] when `keyId` or `signature` are
    /// missing.
    pub fn parse_signature_header(header: &str) -> AppResult<SignatureComponents> {
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers_list = None;
        let mut signature = None;

        for part in header.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                let value = value.trim_matches('"');
                match key {
                    "keyId" => key_id = Some(value.to_string()),
                    "algorithm" => algorithm = Some(value.to_string()),
                    "headers" => headers_list = Some(value.to_string()),
                    "signature" => signature = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        Ok(SignatureComponents {
            key_id: key_id
                .ok_or_else(|| AppError::Validation("Signature header has no keyId".to_string()))?,
            algorithm: algorithm.unwrap_or_else(|| ALGORITHM.to_string()),
            headers: headers_list
                .unwrap_or_else(|| "date".to_string())
                .split(' ')
                .map(String::from)
                .collect(),
            signature: signature.ok_or_else(|| {
                AppError::Validation("Signature header has no signature".to_string())
            })?,
        })
    }

    /// Verify a signature against the given public key.
    ///
    /// `headers` maps lowercase header names to received values. Any
    /// structural mismatch (bad PEM, unknown algorithm, missing header,
    /// bad base64, wrong signature) is `false`, never an error.
    #[must_use]
    pub fn verify(
        public_key_pem: &str,
        components: &SignatureComponents,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
    ) -> bool {
        if !components.algorithm.eq_ignore_ascii_case(ALGORITHM) {
            warn!(algorithm = %components.algorithm, "Unsupported signature algorithm");
            return false;
        }

        let Ok(public_key) = parse_public_key(public_key_pem) else {
            warn!("Public key does not parse");
            return false;
        };

        let request_target = format!("{} {path}", method.to_lowercase());
        let Some(signing_string) =
            build_signing_string(&components.headers, &request_target, headers)
        else {
            warn!("Signed header missing from request");
            return false;
        };

        debug!(signing_string = %signing_string, "Verifying signing string");

        let Ok(signature_bytes) = BASE64.decode(&components.signature) else {
            warn!("Signature is not valid base64");
            return false;
        };
        let Ok(sig) = rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice()) else {
            warn!("Signature has wrong length");
            return false;
        };

        let verifying_key = VerifyingKey::<Sha256>::new(public_key);
        match verifying_key.verify(signing_string.as_bytes(), &sig) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Signature verification failed");
                false
            }
        }
    }
}

/// Build the canonical signing string, or `None` when a named header is
/// missing from `headers`.
fn build_signing_string(
    signed_headers: &[String],
    request_target: &str,
    headers: &HashMap<String, String>,
) -> Option<String> {
    let mut parts = Vec::with_capacity(signed_headers.len());
    for header in signed_headers {
        let value = if header == "(request-target)" {
            request_target.to_string()
        } else {
            headers.get(header.as_str())?.clone()
        };
        parts.push(format!("{header}: {value}"));
    }
    Some(parts.join("\n"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use postbox_common::generate_rsa_keypair;

    fn signed_request() -> (String, SignatureComponents, HashMap<String, String>) {
        let keypair = generate_rsa_keypair().unwrap();
        let signer = HttpSigner::new(
            &keypair.private_key_pem,
            "https://local.example/users/alice#main-key".to_string(),
        )
        .unwrap();

        let url = Url::parse("https://remote.example/sharedInbox").unwrap();
        let header_pairs = signer
            .sign_request("POST", &url, "application/activity+json")
            .unwrap();

        let mut headers = HashMap::new();
        let mut signature_header = String::new();
        for (name, value) in header_pairs {
            if name == "Signature" {
                signature_header = value;
            } else {
                headers.insert(name.to_lowercase(), value);
            }
        }
        let components = HttpVerifier::parse_signature_header(&signature_header).unwrap();
        (keypair.public_key_pem, components, headers)
    }

    #[test]
    fn test_sign_and_verify() {
        let (public_pem, components, headers) = signed_request();
        assert!(HttpVerifier::verify(
            &public_pem,
            &components,
            "POST",
            "/sharedInbox",
            &headers,
        ));
    }

    #[test]
    fn test_wrong_path_fails() {
        let (public_pem, components, headers) = signed_request();
        assert!(!HttpVerifier::verify(
            &public_pem,
            &components,
            "POST",
            "/users/alice/inbox",
            &headers,
        ));
    }

    #[test]
    fn test_tampered_date_fails() {
        let (public_pem, components, mut headers) = signed_request();
        headers.insert(
            "date".to_string(),
            "Mon, 01 Jan 2024 00:00:00 GMT".to_string(),
        );
        assert!(!HttpVerifier::verify(
            &public_pem,
            &components,
            "POST",
            "/sharedInbox",
            &headers,
        ));
    }

    #[test]
    fn test_malformed_input_is_false_not_error() {
        let (public_pem, mut components, headers) = signed_request();

        // Wrong algorithm
        let mut wrong_algo = components.clone();
        wrong_algo.algorithm = "hs2019".to_string();
        assert!(!HttpVerifier::verify(
            &public_pem,
            &wrong_algo,
            "POST",
            "/sharedInbox",
            &headers,
        ));

        // Bad base64
        components.signature = "not base64!!".to_string();
        assert!(!HttpVerifier::verify(
            &public_pem,
            &components,
            "POST",
            "/sharedInbox",
            &headers,
        ));

        // Bad PEM
        assert!(!HttpVerifier::verify(
            "not a key",
            &components,
            "POST",
            "/sharedInbox",
            &headers,
        ));
    }

    #[test]
    fn test_missing_signed_header_is_false() {
        let (public_pem, components, mut headers) = signed_request();
        headers.remove("content-type");
        assert!(!HttpVerifier::verify(
            &public_pem,
            &components,
            "POST",
            "/sharedInbox",
            &headers,
        ));
    }

    #[test]
    fn test_parse_signature_header() {
        let header = r#"keyId="https://x/users/a#main-key",algorithm="rsa-sha256",headers="(request-target) host date content-type",signature="abc==""#;
        let components = HttpVerifier::parse_signature_header(header).unwrap();
        assert_eq!(components.key_id, "https://x/users/a#main-key");
        assert_eq!(components.headers.len(), 4);
        assert_eq!(components.signature, "abc==");

        assert!(HttpVerifier::parse_signature_header("garbage").is_err());
    }
}
