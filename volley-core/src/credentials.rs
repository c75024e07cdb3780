use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Parses `username:password` lines. Blank lines and `#` comments are skipped;
/// the password is everything after the first `:`.
pub fn parse_credentials(text: &str) -> Result<Vec<Credential>> {
    let mut out = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let invalid = |reason: &str| Error::InvalidCredentials {
            line: idx + 1,
            reason: reason.to_string(),
        };

        let (username, password) = line
            .split_once(':')
            .ok_or_else(|| invalid("expected `username:password`"))?;
        if username.is_empty() {
            return Err(invalid("empty username"));
        }
        if password.is_empty() {
            return Err(invalid("empty password"));
        }

        out.push(Credential {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    Ok(out)
}

pub async fn load_credentials(path: &Path) -> Result<Vec<Credential>> {
    let text = tokio::fs::read_to_string(path).await?;
    let creds = parse_credentials(&text)?;
    tracing::debug!(path = %path.display(), count = creds.len(), "loaded credentials");
    Ok(creds)
}
