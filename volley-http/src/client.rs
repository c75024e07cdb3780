use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::Duration;

use super::estimate::{request_bytes, response_head_bytes};
use super::util::{has_header, host_header_value, parse_target};
use super::{Error, HttpRequest, HttpResponse, Result};

/// Pooled HTTP/1.1 client shared by every virtual user of a run.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    default_timeout: Option<Duration>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // The OS-level TCP connect timeout can be tens of seconds, which makes short
        // runs against an unreachable host look hung.
        Self::new(Some(Duration::from_secs(3)), None)
    }
}

impl HttpClient {
    /// `default_timeout` bounds a whole request (connect, headers and body) unless the
    /// request carries its own timeout.
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>, default_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);
        http_connector.set_nodelay(true);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self {
            inner,
            default_timeout,
        }
    }

    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        match req.timeout.or(self.default_timeout) {
            Some(timeout) => tokio::time::timeout(timeout, self.send(req))
                .await
                .unwrap_or(Err(Error::Timeout(timeout))),
            None => self.send(req).await,
        }
    }

    async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let parsed = parse_target(&req.url)?;
        let bytes_sent = request_bytes(&req.method, &parsed, &req.headers, req.body.len() as u64);

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);

        // Make implicit headers explicit so byte accounting matches what goes out.
        if !has_header(&req.headers, "host")
            && let Some(host) = host_header_value(&parsed)
        {
            builder = builder.header(http::header::HOST, host);
        }
        if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }

        let invalid = |e: &dyn std::fmt::Display| Error::InvalidRequest(e.to_string());
        for (k, v) in req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes()).map_err(|e| invalid(&e))?;
            let value = http::header::HeaderValue::from_str(&v)
                .map_err(|e| invalid(&format!("header `{k}`: {e}")))?;
            builder = builder.header(name, value);
        }

        let request: Request<Full<Bytes>> = builder.body(Full::new(req.body)).map_err(|e| invalid(&e))?;
        let res = self.inner.request(request).await?;

        let (parts, body) = res.into_parts();
        let head_bytes = response_head_bytes(parts.status, &parts.headers);

        // Lowercase keys; repeated headers are joined with ", ".
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &parts.headers {
            let v = String::from_utf8_lossy(value.as_bytes()).into_owned();
            merged
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|cur| {
                    cur.push_str(", ");
                    cur.push_str(&v);
                })
                .or_insert(v);
        }

        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            bytes_sent,
            bytes_received: head_bytes.saturating_add(body.len() as u64),
            headers: merged.into_iter().collect(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::HttpTransportErrorKind;
    use std::time::Instant;

    #[tokio::test]
    async fn unreachable_host_fails_fast_with_connect_timeout() {
        let client = HttpClient::new(Some(Duration::from_millis(200)), None);
        let req = HttpRequest::get("http://192.0.2.1:81/");

        let started = Instant::now();
        let _err = client.request(req).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(
            elapsed < Duration::from_secs(2),
            "expected fast failure, elapsed={elapsed:?}"
        );
    }

    #[tokio::test]
    async fn header_value_with_newline_is_an_invalid_request() {
        let client = HttpClient::default();
        let req = HttpRequest::get("http://127.0.0.1:9/").with_header("x-token", "a\nb");
        let err = client.request(req).await.unwrap_err();
        assert_eq!(
            err.transport_error_kind(),
            HttpTransportErrorKind::InvalidRequest
        );
        assert!(err.to_string().contains("x-token"), "{err}");
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme_before_connecting() {
        let client = HttpClient::default();
        let err = client
            .request(HttpRequest::get("ftp://127.0.0.1/"))
            .await
            .unwrap_err();
        assert_eq!(
            err.transport_error_kind(),
            HttpTransportErrorKind::UnsupportedScheme
        );
    }
}
