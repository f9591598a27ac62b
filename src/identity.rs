//! Stable cache keys derived from requests.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::http::{Method, Request};

/// Canonical cache key for a request: method + normalized URL + selected headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
  hash: String,
  url: String,
}

impl RequestIdentity {
  /// Derive the identity of `request`, folding in the values of `vary` headers.
  pub fn of(request: &Request, vary: &[String]) -> Result<Self> {
    Self::from_parts(
      request.method,
      &request.url,
      |name| request.headers.get(name).map(String::from),
      vary,
    )
  }

  /// Identity of a plain GET for `url` with no vary headers.
  pub fn for_get(url: &str) -> Result<Self> {
    Self::from_parts(Method::Get, url, |_| None, &[])
  }

  fn from_parts<F>(method: Method, url: &str, header: F, vary: &[String]) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let url = normalize_url(url)?;

    let mut input = format!("{}\n{}", method, url);
    let mut names: Vec<String> = vary.iter().map(|v| v.to_ascii_lowercase()).collect();
    names.sort();
    names.dedup();
    // Absent headers are left out, so an un-varied request keys like `for_get`
    for name in names {
      let Some(value) = header(name.as_str()) else {
        continue;
      };
      input.push('\n');
      input.push_str(&name);
      input.push('=');
      input.push_str(value.trim());
    }

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(Self { hash, url })
  }

  pub fn as_str(&self) -> &str {
    &self.hash
  }

  /// Normalized URL the identity was derived from.
  pub fn url(&self) -> &str {
    &self.url
  }
}

impl fmt::Display for RequestIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.hash)
  }
}

/// Normalize a URL for consistent hashing.
///
/// Lowercases scheme and host, drops default ports and the fragment.
pub fn normalize_url(raw: &str) -> Result<String> {
  let mut url =
    Url::parse(raw.trim()).map_err(|e| eyre!("Invalid request URL '{}': {}", raw, e))?;
  url.set_fragment(None);
  Ok(url.into())
}
