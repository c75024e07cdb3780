use super::util::{has_header, host_header_value, parse_target};
use super::{HttpRequest, Result};

/// Estimate bytes sent for an HTTP request.
///
/// Best-effort HTTP/1.1 framing: request line + headers + CRLF + body. Host and
/// Content-Length are counted even when the caller did not set them, since the
/// client always adds them.
pub fn estimate_http_request_bytes(req: &HttpRequest) -> Result<u64> {
    let parsed = parse_target(&req.url)?;
    Ok(request_bytes(
        &req.method,
        &parsed,
        &req.headers,
        req.body.len() as u64,
    ))
}

pub(super) fn request_bytes(
    method: &http::Method,
    parsed: &url::Url,
    headers: &[(String, String)],
    body_len: u64,
) -> u64 {
    let path_len = match parsed.query() {
        Some(q) => parsed.path().len() + 1 + q.len(),
        None => parsed.path().len(),
    } as u64;

    // "METHOD SP path SP HTTP/1.1 CRLF"
    let mut bytes = (method.as_str().len() as u64) + 1 + path_len + 1 + 8 + 2;

    for (k, v) in headers {
        bytes = bytes.saturating_add(header_bytes(k.len(), v.len()));
    }

    if !has_header(headers, "host")
        && let Some(host) = host_header_value(parsed)
    {
        bytes = bytes.saturating_add(header_bytes("host".len(), host.len()));
    }

    if body_len != 0 && !has_header(headers, "content-length") {
        let v = body_len.to_string();
        bytes = bytes.saturating_add(header_bytes("content-length".len(), v.len()));
    }

    bytes.saturating_add(2).saturating_add(body_len)
}

pub(super) fn response_head_bytes(status: http::StatusCode, headers: &http::HeaderMap) -> u64 {
    // "HTTP/1.1 SP 200 CRLF"; the reason phrase is ignored.
    let mut bytes = 8 + 1 + status.as_str().len() as u64 + 2;
    for (name, value) in headers {
        bytes = bytes.saturating_add(header_bytes(name.as_str().len(), value.len()));
    }
    bytes.saturating_add(2)
}

fn header_bytes(name_len: usize, value_len: usize) -> u64 {
    // "name: value\r\n"
    (name_len as u64) + 2 + (value_len as u64) + 2
}
