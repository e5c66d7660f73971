//! In-memory transport with scripted per-URL behaviour.

use crate::transport::{Body, Credential, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Fail to connect `failures` times, then serve `body`.
    Serve { body: Vec<u8>, failures: u32 },
    Status(u16),
    /// Declare more bytes than the body holds.
    Short { body: Vec<u8>, declared: u64 },
    /// A body that never ends; each read waits `delay` first.
    Endless { delay: Duration },
    /// A broken transport.
    Panic,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, u32>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub(crate) fn serve(self, url: &str, body: &[u8]) -> Self {
        self.script(url, Script::Serve { body: body.to_vec(), failures: 0 })
    }

    pub(crate) fn script(mut self, url: &str, script: Script) -> Self {
        self.scripts.insert(url.to_string(), script);
        self
    }

    pub(crate) fn calls(&self, url: &str) -> u32 {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    /// Every URL in the order it was first opened.
    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &str, _credential: &Credential) -> TransportResult<Box<dyn Body>> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_default();
            *count += 1;
            if *count == 1 {
                self.opened.lock().unwrap().push(url.to_string());
            }
            *count
        };
        let body = match self.scripts.get(url) {
            None => exn::bail!(TransportError::Status(404)),
            Some(Script::Panic) => panic!("transport bug while opening {url}"),
            Some(Script::Status(status)) => exn::bail!(TransportError::Status(*status)),
            Some(Script::Serve { failures, .. }) if attempt <= *failures => {
                exn::bail!(TransportError::Connect("connection reset".to_string()))
            },
            Some(Script::Serve { body, .. }) => {
                ScriptedBody { data: body.clone(), declared: Some(body.len() as u64), delay: None }
            },
            Some(Script::Short { body, declared }) => {
                ScriptedBody { data: body.clone(), declared: Some(*declared), delay: None }
            },
            Some(Script::Endless { delay }) => ScriptedBody { data: Vec::new(), declared: None, delay: Some(*delay) },
        };
        Ok(Box::new(body))
    }
}

struct ScriptedBody {
    data: Vec<u8>,
    declared: Option<u64>,
    delay: Option<Duration>,
}

#[async_trait]
impl Body for ScriptedBody {
    fn content_length(&self) -> Option<u64> {
        self.declared
    }

    fn content_type(&self) -> Option<&str> {
        Some("application/octet-stream")
    }

    async fn read(&mut self, max: usize) -> TransportResult<Vec<u8>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
            return Ok(vec![0; max.min(16)]);
        }
        let take = max.min(self.data.len());
        Ok(self.data.drain(..take).collect())
    }
}
