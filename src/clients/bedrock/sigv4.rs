//! AWS Signature Version 4 request signing.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub struct SigningScope<'a> {
    pub region: &'a str,
    pub service: &'a str,
    /// `YYYYMMDD'T'HHMMSS'Z'`
    pub amz_date: &'a str,
}

impl SigningScope<'_> {
    fn date(&self) -> &str {
        &self.amz_date[..8]
    }

    fn credential_scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.date(),
            self.region,
            self.service
        )
    }
}

pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Path as sent on the wire, already percent-encoded once.
    pub path: &'a str,
    pub query: &'a str,
    /// Header names and values to sign; must include `host` and `x-amz-date`.
    pub headers: &'a [(&'a str, &'a str)],
    pub payload: &'a [u8],
}

impl CanonicalRequest<'_> {
    fn signed_headers(&self) -> String {
        let mut names: Vec<String> = self
            .headers
            .iter()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect();
        names.sort();
        names.join(";")
    }

    fn render(&self) -> String {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(name, value)| {
                let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
                (name.to_ascii_lowercase(), collapsed)
            })
            .collect();
        headers.sort();

        let mut canonical_headers = String::new();
        for (name, value) in &headers {
            canonical_headers.push_str(name);
            canonical_headers.push(':');
            canonical_headers.push_str(value);
            canonical_headers.push('\n');
        }

        let canonical_uri = if self.path.is_empty() {
            "/".to_string()
        } else {
            uri_encode(self.path, false)
        };

        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            canonical_uri,
            self.query,
            canonical_headers,
            self.signed_headers(),
            hex_sha256(self.payload)
        )
    }
}

/// Compute the `Authorization` header value for `request`.
pub fn authorization(
    request: &CanonicalRequest<'_>,
    credentials: &AwsCredentials,
    scope: &SigningScope<'_>,
) -> String {
    let signature = signature(request, credentials, scope);
    format!(
        "{ALGORITHM} Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id,
        scope.credential_scope(),
        request.signed_headers(),
        signature
    )
}

pub fn signature(
    request: &CanonicalRequest<'_>,
    credentials: &AwsCredentials,
    scope: &SigningScope<'_>,
) -> String {
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{}\n{}",
        scope.amz_date,
        scope.credential_scope(),
        hex_sha256(request.render().as_bytes())
    );
    let key = signing_key(
        &credentials.secret_access_key,
        scope.date(),
        scope.region,
        scope.service,
    );
    hex(&hmac(&key, string_to_sign.as_bytes()))
}

pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

pub fn hex_sha256(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

/// Percent-encode everything but RFC 3986 unreserved characters.
/// `/` is kept unless `encode_slash` is set.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
