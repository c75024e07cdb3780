pub(super) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

pub(super) fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match (parsed.scheme(), parsed.port()) {
        (_, None) | ("http", Some(80)) | ("https", Some(443)) => Some(host.to_string()),
        (_, Some(port)) => Some(format!("{host}:{port}")),
    }
}

pub(super) fn parse_target(raw: &str) -> super::Result<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|_| super::Error::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(super::Error::UnsupportedScheme(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_header_omits_default_ports() {
        let u = url::Url::parse("http://example.com:80/a").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(host_header_value(&u).as_deref(), Some("example.com"));

        let u = url::Url::parse("http://127.0.0.1:8080/a").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(host_header_value(&u).as_deref(), Some("127.0.0.1:8080"));
    }

    #[test]
    fn parse_target_rejects_other_schemes() {
        assert!(matches!(
            parse_target("ftp://example.com/"),
            Err(super::super::Error::UnsupportedScheme(_))
        ));
        assert!(matches!(
            parse_target("not a url"),
            Err(super::super::Error::InvalidUrl(_))
        ));
    }
}
