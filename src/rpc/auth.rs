//! HTTP authentication helpers for private node endpoints that sit behind
//! Basic auth. Public endpoints simply get an empty header map.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use jsonrpsee::http_client::{HeaderMap, HeaderValue};

pub(crate) fn build_auth_headers(user: Option<&str>, password: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let Some(user) = user.filter(|value| !value.is_empty()) else {
        return Ok(headers);
    };

    let credentials = format!("{user}:{}", password.unwrap_or_default());
    let encoded = BASE64_STANDARD.encode(credentials);
    let value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .context("failed to build Authorization header")?;
    headers.insert("Authorization", value);
    Ok(headers)
}
