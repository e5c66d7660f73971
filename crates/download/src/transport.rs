use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use derive_more::{Display, Error};
use exn::ResultExt;
use reqwest::header::CONTENT_TYPE;
use std::fmt;

pub type TransportResult<T> = std::result::Result<T, exn::Exn<TransportError>>;

/// Typed failure of the transport seam.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum TransportError {
    #[display("timed out")]
    Timeout,
    #[display("connection failed: {_0}")]
    Connect(#[error(not(source))] String),
    /// The server answered, but not with success.
    #[display("unexpected status {_0}")]
    Status(#[error(not(source))] u16),
    #[display("body read failed")]
    Body,
}

impl TransportError {
    /// Invalid responses are final; everything else may clear up.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Status(_))
    }
}

/// Session credential handed over by the authentication collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_empty(&self) -> bool {
        self.token.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential").field("token", &"<redacted>").finish()
    }
}

/// Opens byte streams for URLs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection to `url`. Resolves once the response headers
    /// are in; the body is read through the returned [`Body`].
    async fn open(&self, url: &str, credential: &Credential) -> TransportResult<Box<dyn Body>>;
}

#[async_trait]
pub trait Body: Send {
    fn content_length(&self) -> Option<u64>;

    fn content_type(&self) -> Option<&str>;

    /// Read up to `max` bytes. An empty buffer marks the end of the body.
    ///
    /// Must be cancel safe: dropping the future loses no data.
    async fn read(&mut self, max: usize) -> TransportResult<Vec<u8>>;
}

/// [`Transport`] over HTTP(S). The credential travels as the `token` query
/// parameter.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::Client)?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &str, credential: &Credential) -> TransportResult<Box<dyn Body>> {
        let response = self
            .client
            .get(url)
            .query(&[("token", credential.token())])
            .send()
            .await
            .or_raise(|| TransportError::Connect(url.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            exn::bail!(TransportError::Status(status.as_u16()));
        }
        let content_type = response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
        Ok(Box::new(HttpBody { content_length: response.content_length(), content_type, response, pending: Vec::new() }))
    }
}

struct HttpBody {
    content_length: Option<u64>,
    content_type: Option<String>,
    response: reqwest::Response,
    pending: Vec<u8>,
}

#[async_trait]
impl Body for HttpBody {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    async fn read(&mut self, max: usize) -> TransportResult<Vec<u8>> {
        // Frames land in `pending` before anything is handed out.
        while self.pending.len() < max {
            match self.response.chunk().await.or_raise(|| TransportError::Body)? {
                Some(frame) => self.pending.extend_from_slice(&frame),
                None => break,
            }
        }
        let take = max.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }
}
