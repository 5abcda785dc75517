//! AWS Signature Version 4 query-string presigning

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Longest validity SigV4 allows for a presigned URL (7 days)
pub const MAX_EXPIRES_SECS: u64 = 604_800;

/// How far in the future a signing time may be
const MAX_CLOCK_SKEW_SECS: i64 = 900;

const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Everything except unreserved characters is percent-encoded
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Errors while presigning or verifying a request
#[derive(Debug, Error)]
pub enum SigV4Error {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Expiry must be between 1 and 604800 seconds, got {0}")]
    InvalidExpiry(u64),

    #[error("Missing credential")]
    MissingCredential,

    #[error("Missing query parameter {0}")]
    MissingParameter(&'static str),

    #[error("Malformed query parameter {0}")]
    MalformedParameter(&'static str),

    #[error("Unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid credential format")]
    InvalidCredentialFormat,

    #[error("Unknown access key {0}")]
    UnknownAccessKey(String),

    #[error("Only the host header may be signed")]
    UnsupportedSignedHeaders,

    #[error("Request has expired")]
    Expired,

    #[error("Request time too skewed")]
    RequestTimeTooSkewed,

    #[error("Signature mismatch")]
    SignatureMismatch,
}

/// Static signing credentials
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

/// How the bucket is addressed in the URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Addressing {
    /// `https://endpoint/bucket/key`
    #[default]
    PathStyle,
    /// `https://bucket.endpoint/key`
    VirtualHosted,
}

/// A request to presign
#[derive(Debug, Clone)]
pub struct PresignRequest<'a> {
    pub method: &'a str,
    pub endpoint: &'a Url,
    pub addressing: Addressing,
    pub bucket: &'a str,
    pub key: &'a str,
    /// Operation parameters such as `partNumber` and `uploadId`
    pub query: Vec<(String, String)>,
    pub region: &'a str,
    pub service: &'a str,
    pub credentials: &'a Credentials,
    pub timestamp: DateTime<Utc>,
    pub expires_in: u64,
}

/// Build a presigned URL carrying the signature in `X-Amz-*` query parameters
///
/// The payload is left unsigned and `host` is the only signed header, so the
/// URL can be used by any HTTP client as-is.
pub fn presign_url(request: &PresignRequest<'_>) -> Result<String, SigV4Error> {
    if request.expires_in == 0 || request.expires_in > MAX_EXPIRES_SECS {
        return Err(SigV4Error::InvalidExpiry(request.expires_in));
    }
    if request.credentials.access_key_id.is_empty()
        || request.credentials.secret_access_key.is_empty()
    {
        return Err(SigV4Error::MissingCredential);
    }

    let endpoint_host = request
        .endpoint
        .host_str()
        .ok_or_else(|| SigV4Error::InvalidEndpoint(request.endpoint.to_string()))?;

    let host_name = match request.addressing {
        Addressing::PathStyle => endpoint_host.to_string(),
        Addressing::VirtualHosted => format!("{}.{}", request.bucket, endpoint_host),
    };
    let host = match request.endpoint.port() {
        Some(port) => format!("{}:{}", host_name, port),
        None => host_name,
    };

    let object_path = match request.addressing {
        Addressing::PathStyle => format!("/{}/{}", request.bucket, request.key),
        Addressing::VirtualHosted => format!("/{}", request.key),
    };
    let canonical_uri = format!(
        "{}{}",
        request.endpoint.path().trim_end_matches('/'),
        encode_path(&object_path)
    );

    let date = request.timestamp.format("%Y%m%d").to_string();
    let amz_date = request.timestamp.format(AMZ_DATE_FORMAT).to_string();
    let scope = format!(
        "{}/{}/{}/aws4_request",
        date, request.region, request.service
    );

    let mut params = request.query.clone();
    params.push(("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()));
    params.push((
        "X-Amz-Credential".to_string(),
        format!("{}/{}", request.credentials.access_key_id, scope),
    ));
    params.push(("X-Amz-Date".to_string(), amz_date.clone()));
    params.push(("X-Amz-Expires".to_string(), request.expires_in.to_string()));
    params.push(("X-Amz-SignedHeaders".to_string(), "host".to_string()));
    if let Some(token) = &request.credentials.session_token {
        params.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }
    let canonical_query = canonical_query_string(&params);

    let signed_headers = vec!["host".to_string()];
    let canonical_request = create_canonical_request(
        request.method,
        &canonical_uri,
        &canonical_query,
        &[("host".to_string(), host.clone())],
        &signed_headers,
        UNSIGNED_PAYLOAD,
    );

    let string_to_sign = create_string_to_sign(ALGORITHM, &amz_date, &scope, &canonical_request);
    let signing_key = derive_signing_key(
        &request.credentials.secret_access_key,
        &date,
        request.region,
        request.service,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    Ok(format!(
        "{}://{}{}?{}&X-Amz-Signature={}",
        request.endpoint.scheme(),
        host,
        canonical_uri,
        canonical_query,
        signature
    ))
}

/// A received request that carries its signature in the query string
#[derive(Debug, Clone)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    /// Path as received, still percent-encoded
    pub path: &'a str,
    /// Raw query string without the leading `?`
    pub query: &'a str,
    /// Value of the `Host` header
    pub host: &'a str,
    pub now: DateTime<Utc>,
}

/// Verify a request made through a URL built by [`presign_url`]
///
/// The credential scope must name `region` and `service`, the access key must
/// belong to `credentials`, and the URL must not have expired.
pub fn verify_presigned(
    request: &SignedRequest<'_>,
    credentials: &Credentials,
    region: &str,
    service: &str,
) -> Result<(), SigV4Error> {
    let mut params: Vec<(String, String)> =
        url::form_urlencoded::parse(request.query.as_bytes())
            .into_owned()
            .collect();

    let signature_index = params
        .iter()
        .position(|(k, _)| k == "X-Amz-Signature")
        .ok_or(SigV4Error::MissingParameter("X-Amz-Signature"))?;
    let (_, signature) = params.remove(signature_index);

    let param = |name: &'static str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .ok_or(SigV4Error::MissingParameter(name))
    };

    let algorithm = param("X-Amz-Algorithm")?;
    if algorithm != ALGORITHM {
        return Err(SigV4Error::UnsupportedAlgorithm(algorithm.to_string()));
    }

    let credential = param("X-Amz-Credential")?;
    let (access_key, scope) = credential
        .split_once('/')
        .ok_or(SigV4Error::InvalidCredentialFormat)?;
    let scope_parts: Vec<&str> = scope.split('/').collect();
    let [date, scope_region, scope_service, terminator] = scope_parts[..] else {
        return Err(SigV4Error::InvalidCredentialFormat);
    };
    if terminator != "aws4_request" || scope_region != region || scope_service != service {
        return Err(SigV4Error::InvalidCredentialFormat);
    }
    if access_key != credentials.access_key_id {
        return Err(SigV4Error::UnknownAccessKey(access_key.to_string()));
    }
    if let Some(token) = &credentials.session_token {
        if param("X-Amz-Security-Token")? != token {
            return Err(SigV4Error::SignatureMismatch);
        }
    }

    let amz_date = param("X-Amz-Date")?;
    if !amz_date.starts_with(date) {
        return Err(SigV4Error::InvalidCredentialFormat);
    }
    let signed_at = NaiveDateTime::parse_from_str(amz_date, AMZ_DATE_FORMAT)
        .map_err(|_| SigV4Error::MalformedParameter("X-Amz-Date"))?
        .and_utc();

    let expires: u64 = param("X-Amz-Expires")?
        .parse()
        .map_err(|_| SigV4Error::MalformedParameter("X-Amz-Expires"))?;
    if expires == 0 || expires > MAX_EXPIRES_SECS {
        return Err(SigV4Error::InvalidExpiry(expires));
    }
    let lifetime = i64::try_from(expires)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or(SigV4Error::InvalidExpiry(expires))?;
    let expires_at = signed_at
        .checked_add_signed(lifetime)
        .ok_or(SigV4Error::MalformedParameter("X-Amz-Date"))?;
    if request.now > expires_at {
        return Err(SigV4Error::Expired);
    }
    if signed_at - request.now > TimeDelta::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(SigV4Error::RequestTimeTooSkewed);
    }

    let signed_headers: Vec<String> = param("X-Amz-SignedHeaders")?
        .split(';')
        .map(str::to_ascii_lowercase)
        .collect();
    if signed_headers != ["host"] {
        return Err(SigV4Error::UnsupportedSignedHeaders);
    }

    let canonical_uri = encode_path(&percent_decode_str(request.path).decode_utf8_lossy());
    let canonical_query = canonical_query_string(&params);
    let canonical_request = create_canonical_request(
        request.method,
        &canonical_uri,
        &canonical_query,
        &[("host".to_string(), request.host.to_string())],
        &signed_headers,
        UNSIGNED_PAYLOAD,
    );
    let string_to_sign = create_string_to_sign(ALGORITHM, amz_date, scope, &canonical_request);
    let signing_key = derive_signing_key(&credentials.secret_access_key, date, region, service);

    let expected = hex::decode(&signature).map_err(|_| SigV4Error::SignatureMismatch)?;
    let mut mac =
        HmacSha256::new_from_slice(&signing_key).map_err(|_| SigV4Error::SignatureMismatch)?;
    mac.update(string_to_sign.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| SigV4Error::SignatureMismatch)
}

/// URI-encode each path segment, keeping the separators
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_ENCODE).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Encode and sort query parameters by encoded name, then value
fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, URI_ENCODE).to_string(),
                utf8_percent_encode(v, URI_ENCODE).to_string(),
            )
        })
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign a string using HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the signing key
fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Create the canonical request string
fn create_canonical_request(
    method: &str,
    path: &str,
    query_string: &str,
    headers: &[(String, String)],
    signed_headers: &[String],
    payload_hash: &str,
) -> String {
    let canonical_headers: String = signed_headers
        .iter()
        .filter_map(|h| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(h))
                .map(|(k, v)| format!("{}:{}\n", k.to_lowercase(), v.trim()))
        })
        .collect();

    let signed_headers_str = signed_headers.join(";");

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, path, query_string, canonical_headers, signed_headers_str, payload_hash
    )
}

/// Create the string to sign
fn create_string_to_sign(
    algorithm: &str,
    timestamp: &str,
    scope: &str,
    canonical_request: &str,
) -> String {
    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{}\n{}\n{}\n{}", algorithm, timestamp, scope, canonical_hash)
}
