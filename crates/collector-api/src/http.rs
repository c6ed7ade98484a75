// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Default [`Transport`] over HTTPS using `reqwest`.
//!
//! Each remote method is a POST to `/agent_listener/invoke_raw_method` with
//! the method name, license key, protocol version, and run id in the query
//! string. Large bodies are gzip-compressed. The collector wraps successful
//! results in `{"return_value": ...}`, which is unwrapped here.

use std::error::Error as _;
use std::io::Write;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT,
};
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::Config;
use crate::errors::{TransportError, TransportErrorKind};
use crate::transport::{RawResponse, RemoteRequest, Transport};

const INVOKE_PATH: &str = "/agent_listener/invoke_raw_method";
const PROTOCOL_VERSION: &str = "17";
/// Bodies above this size are gzip-compressed.
const COMPRESSION_THRESHOLD: usize = 64 * 1024;

#[cfg(feature = "fips")]
fn tls_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorKind::Protocol, message)
}

#[cfg(not(feature = "fips"))]
fn client_builder() -> Result<ClientBuilder, TransportError> {
    Ok(Client::builder().use_rustls_tls())
}

/// Client builder pinned to the process-wide FIPS crypto provider. Refuses to
/// build anything the provider or the final TLS config reports as non-FIPS.
#[cfg(feature = "fips")]
fn client_builder() -> Result<ClientBuilder, TransportError> {
    let provider = rustls::crypto::CryptoProvider::get_default()
        .ok_or_else(|| tls_error("no rustls crypto provider installed"))?;
    if !provider.fips() {
        return Err(tls_error("installed crypto provider is not FIPS-validated"));
    }

    let tls = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|e| tls_error(format!("unsupported TLS protocol versions: {e}")))?
        .with_root_certificates(native_roots()?)
        .with_no_client_auth();
    if !tls.fips() {
        return Err(tls_error("collector TLS config is not FIPS-compliant"));
    }
    debug!("Collector client uses FIPS TLS.");

    Ok(Client::builder().use_preconfigured_tls(tls))
}

#[cfg(feature = "fips")]
fn native_roots() -> Result<rustls::RootCertStore, TransportError> {
    let mut roots = rustls::RootCertStore::empty();
    let (added, skipped) =
        roots.add_parsable_certificates(rustls_native_certs::load_native_certs().certs);
    if skipped > 0 {
        debug!("Skipped {skipped} unparsable native root certificates");
    }
    if added == 0 {
        return Err(tls_error("no usable certificates in the native root store"));
    }
    Ok(roots)
}

/// Proxy URL from the configuration. A full `proxy` URL wins; otherwise
/// `proxy_host`/`proxy_port` are reached over https.
fn proxy_url(config: &Config) -> Option<String> {
    if let Some(proxy) = &config.proxy {
        return Some(proxy.clone());
    }
    match (&config.proxy_host, config.proxy_port) {
        (Some(host), Some(port)) => Some(format!("https://{host}:{port}")),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    license_key: String,
    user_agent: String,
    scheme: &'static str,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let mut builder = client_builder()?.timeout(config.request_timeout);
        if let Some(proxy) = proxy_url(config) {
            let proxy = reqwest::Proxy::all(&proxy)
                .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| map_reqwest_error(&e))?;
        Ok(Self {
            client,
            license_key: config.license_key.clone(),
            user_agent: format!("collector-api/{}", config.agent_version),
            scheme: "https",
        })
    }

    /// Talks plain http, for local collectors and tests.
    pub fn plaintext(config: &Config) -> Result<Self, TransportError> {
        let mut transport = Self::new(config)?;
        transport.scheme = "http";
        Ok(transport)
    }

    fn url(&self, request: &RemoteRequest) -> String {
        format!(
            "{}://{}:{}{INVOKE_PATH}",
            self.scheme, request.endpoint.host, request.endpoint.port
        )
    }

    fn headers(&self, request: &RemoteRequest, compressed: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if compressed {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        for (name, value) in request.headers.iter().flatten() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => debug!("Skipping invalid request header {name}"),
            }
        }
        headers
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(&self, request: RemoteRequest) -> Result<RawResponse, TransportError> {
        let body = serde_json::to_vec(&request.payload)
            .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;
        let (body, compressed) = if body.len() > COMPRESSION_THRESHOLD {
            (gzip(&body)?, true)
        } else {
            (body, false)
        };

        let mut query = vec![
            ("marshal_format", "json"),
            ("protocol_version", PROTOCOL_VERSION),
            ("license_key", self.license_key.as_str()),
            ("method", request.method.name()),
        ];
        if let Some(run_id) = &request.run_id {
            query.push(("run_id", run_id.as_str()));
        }

        trace!(
            method = request.method.name(),
            endpoint = %request.endpoint,
            body_len = body.len(),
            compressed,
            "collector HTTP request"
        );
        let response = self
            .client
            .post(self.url(&request))
            .query(&query)
            .headers(self.headers(&request, compressed))
            .body(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e))?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| map_reqwest_error(&e))?;
        trace!(
            method = request.method.name(),
            status,
            body_len = bytes.len(),
            "collector HTTP response"
        );
        let payload = parse_payload(&bytes)?;
        Ok(RawResponse::new(status, payload))
    }
}

fn gzip(body: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(body)
        .and_then(|()| encoder.finish())
        .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))
}

/// Parses a collector response body. Empty bodies carry no payload.
fn parse_payload(bytes: &[u8]) -> Result<Option<Value>, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| TransportError::new(TransportErrorKind::Decode, e.to_string()))?;
    match value {
        Value::Object(mut body) if body.contains_key("return_value") => {
            Ok(body.remove("return_value"))
        }
        other => Ok(Some(other)),
    }
}

/// Maps a reqwest failure to a transport error kind by inspecting its source chain.
fn map_reqwest_error(err: &reqwest::Error) -> TransportError {
    let mut kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_decode() {
        TransportErrorKind::Decode
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                kind = TransportErrorKind::ConnectionReset;
                break;
            }
        }
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("tls") || text.contains("handshake") || text.contains("invalidcontenttype")
        {
            kind = TransportErrorKind::Protocol;
            break;
        }
        source = cause.source();
    }

    TransportError::new(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_payload_unwraps_return_value() {
        let body = br#"{"return_value": {"agent_run_id": "abc"}}"#;
        assert_eq!(
            parse_payload(body).expect("valid json"),
            Some(json!({"agent_run_id": "abc"}))
        );
    }

    #[test]
    fn parse_payload_keeps_other_bodies() {
        let body = br#"{"exception": {"message": "nope"}}"#;
        assert_eq!(
            parse_payload(body).expect("valid json"),
            Some(json!({"exception": {"message": "nope"}}))
        );
    }

    #[test]
    fn parse_payload_empty_body() {
        assert_eq!(parse_payload(b"").expect("empty"), None);
        assert_eq!(parse_payload(b"  \n").expect("whitespace"), None);
    }

    #[test]
    fn parse_payload_rejects_garbage() {
        let err = parse_payload(b"<html>").expect_err("not json");
        assert_eq!(err.kind, TransportErrorKind::Decode);
    }

    #[test]
    fn transport_builds_with_and_without_proxy() {
        let mut config = Config::new("key", "collector.example.com");
        assert!(HttpTransport::new(&config).is_ok());

        config.proxy_host = Some("proxy.local".to_string());
        config.proxy_port = Some(3128);
        assert!(HttpTransport::new(&config).is_ok());

        config.proxy = Some("not a url".to_string());
        let err = HttpTransport::new(&config).expect_err("bad proxy url");
        assert_eq!(err.kind, TransportErrorKind::Other);
    }

    #[test]
    fn proxy_url_prefers_full_url() {
        let mut config = Config::new("key", "collector.example.com");
        assert_eq!(proxy_url(&config), None);

        config.proxy_host = Some("proxy.local".to_string());
        config.proxy_port = Some(3128);
        assert_eq!(
            proxy_url(&config).as_deref(),
            Some("https://proxy.local:3128")
        );

        config.proxy = Some("http://proxy.local:8080".to_string());
        assert_eq!(proxy_url(&config).as_deref(), Some("http://proxy.local:8080"));
    }

    #[test]
    fn gzip_round_trips_through_flate2() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let body = vec![b'a'; COMPRESSION_THRESHOLD + 1];
        let compressed = gzip(&body).expect("compress");
        assert!(compressed.len() < body.len());

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .expect("decompress");
        assert_eq!(decoded, body);
    }
}
