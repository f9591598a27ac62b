//! Network access seam used by the strategies and the replay engine.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::http::{Headers, Request, Response};

/// A fetch that produced no response at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  /// No response within the per-attempt timeout
  Timeout(Duration),
  /// Connection refused, DNS failure, reset, ...
  Transport(String),
}

impl fmt::Display for NetworkError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NetworkError::Timeout(after) => write!(f, "timed out after {:?}", after),
      NetworkError::Transport(msg) => write!(f, "network error: {}", msg),
    }
  }
}

impl std::error::Error for NetworkError {}

#[async_trait]
pub trait Network: Send + Sync {
  /// Perform the request. Any HTTP status counts as a response.
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Fetch with a bounded wait. Dropping the returned future abandons the fetch.
pub async fn fetch_with_timeout(
  network: &dyn Network,
  request: &Request,
  timeout: Duration,
) -> Result<Response, NetworkError> {
  match tokio::time::timeout(timeout, network.fetch(request)).await {
    Ok(result) => result,
    Err(_) => Err(NetworkError::Timeout(timeout)),
  }
}

/// Real network access through reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> color_eyre::Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("edgecache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| NetworkError::Transport(e.to_string()))?;

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in request.headers.iter() {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| NetworkError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::Transport(e.to_string()))?;

    Ok(Response::new(status, headers, body.to_vec()))
  }
}

#[cfg(test)]
pub mod stub {
  //! Scripted network for tests.

  use super::*;
  use std::collections::{HashMap, VecDeque};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  #[derive(Debug, Clone)]
  pub enum Reply {
    Respond(Response),
    Fail,
    /// Never answers
    Hang,
  }

  /// Each URL has a script of replies; the last reply repeats forever.
  pub struct StubNetwork {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Request>>,
    online: AtomicBool,
  }

  impl StubNetwork {
    pub fn new() -> Self {
      Self {
        routes: Mutex::new(HashMap::new()),
        calls: Mutex::new(Vec::new()),
        online: AtomicBool::new(true),
      }
    }

    pub fn script(&self, url: &str, replies: Vec<Reply>) -> &Self {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), replies.into());
      self
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) -> &Self {
      self.respond_with(url, Response::new(status, Headers::new(), body))
    }

    pub fn respond_with(&self, url: &str, response: Response) -> &Self {
      self.script(url, vec![Reply::Respond(response)])
    }

    pub fn set_online(&self, online: bool) {
      self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Request> {
      self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
      self.calls().iter().filter(|r| r.url == url).count()
    }
  }

  #[async_trait]
  impl Network for StubNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
      self.calls.lock().unwrap().push(request.clone());

      if !self.online.load(Ordering::SeqCst) {
        return Err(NetworkError::Transport("offline".to_string()));
      }

      let reply = {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&request.url) {
          Some(script) if script.len() > 1 => script.pop_front(),
          Some(script) => script.front().cloned(),
          None => None,
        }
      };

      match reply {
        Some(Reply::Respond(response)) => Ok(response),
        Some(Reply::Fail) => Err(NetworkError::Transport("connection refused".to_string())),
        Some(Reply::Hang) => {
          tokio::time::sleep(Duration::from_secs(3600)).await;
          Err(NetworkError::Transport("hung".to_string()))
        }
        None => Err(NetworkError::Transport(format!("no route for {}", request.url))),
      }
    }
  }
}
