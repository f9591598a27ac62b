//! Plain value types for requests and responses flowing through the agent.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::cache::ResponseSource;

/// Header marking responses the agent produced itself.
pub const SYNTHESIZED_HEADER: &str = "x-edgecache";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }

  /// Methods whose failure while offline is queued for replay.
  pub fn is_mutating(&self) -> bool {
    matches!(
      self,
      Method::Post | Method::Put | Method::Patch | Method::Delete
    )
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

/// How the host issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  #[default]
  SameOrigin,
  Cors,
  NoCors,
}

impl FromStr for RequestMode {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "navigate" => Ok(RequestMode::Navigate),
      "same-origin" => Ok(RequestMode::SameOrigin),
      "cors" => Ok(RequestMode::Cors),
      "no-cors" => Ok(RequestMode::NoCors),
      other => Err(eyre!("Unknown request mode: {}", other)),
    }
  }
}

/// Header map with case-insensitive names (stored lowercased).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
    self
      .0
      .insert(name.as_ref().to_ascii_lowercase(), value.into());
  }

  pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
    self.insert(name, value);
    self
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
    self.0.iter()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn to_json(&self) -> Result<String> {
    serde_json::to_string(&self.0).map_err(|e| eyre!("Failed to serialize headers: {}", e))
  }

  pub fn from_json(s: &str) -> Result<Self> {
    let map: BTreeMap<String, String> =
      serde_json::from_str(s).map_err(|e| eyre!("Failed to parse stored headers: {}", e))?;
    Ok(map.into_iter().collect())
  }
}

impl FromIterator<(String, String)> for Headers {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    let mut headers = Headers::new();
    for (name, value) in iter {
      headers.insert(name, value);
    }
    headers
  }
}

/// An outbound request issued by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: String,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      headers: Headers::new(),
      body: None,
      mode: RequestMode::default(),
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  /// A top-level document load.
  pub fn navigate(url: impl Into<String>) -> Self {
    Self::get(url).with_mode(RequestMode::Navigate)
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }
}

/// A response handed back to the host, either real or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  pub fn new(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
      source: ResponseSource::Network,
    }
  }

  /// Build a response the agent made up on the spot (offline markers, queue receipts).
  pub fn synthesized(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    let headers = Headers::new()
      .with("content-type", content_type)
      .with(SYNTHESIZED_HEADER, "1");
    Self {
      status,
      headers,
      body: body.into(),
      source: ResponseSource::Synthesized,
    }
  }

  pub fn with_source(mut self, source: ResponseSource) -> Self {
    self.source = source;
    self
  }

  /// 2xx
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Declared `content-length`, if present and numeric.
  pub fn content_length(&self) -> Option<u64> {
    self
      .headers
      .get("content-length")
      .and_then(|v| v.trim().parse().ok())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_headers_are_case_insensitive() {
    let headers = Headers::new().with("Content-Length", "42");
    assert_eq!(headers.get("content-length"), Some("42"));
    assert_eq!(headers.get("CONTENT-LENGTH"), Some("42"));
  }

  #[test]
  fn test_headers_json_roundtrip_keeps_values() {
    let headers = Headers::new().with("Date", "Tue, 15 Nov 1994 08:12:31 GMT");
    let restored = Headers::from_json(&headers.to_json().unwrap()).unwrap();
    assert_eq!(restored, headers);
  }

  #[test]
  fn test_mutating_methods() {
    assert!(Method::Post.is_mutating());
    assert!(Method::Put.is_mutating());
    assert!(Method::Delete.is_mutating());
    assert!(!Method::Get.is_mutating());
    assert!(!Method::Head.is_mutating());
  }

  #[test]
  fn test_method_parse_is_case_insensitive() {
    assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
    assert!("BREW".parse::<Method>().is_err());
  }

  #[test]
  fn test_content_length_ignores_garbage() {
    let response = Response::new(200, Headers::new().with("content-length", "lots"), "x");
    assert_eq!(response.content_length(), None);

    let response = Response::new(200, Headers::new().with("content-length", " 12 "), "x");
    assert_eq!(response.content_length(), Some(12));
  }

  #[test]
  fn test_synthesized_response_is_marked() {
    let response = Response::synthesized(404, "text/plain", "gone");
    assert_eq!(response.headers.get(SYNTHESIZED_HEADER), Some("1"));
    assert_eq!(response.source, ResponseSource::Synthesized);
    assert!(!response.is_ok());
  }
}
