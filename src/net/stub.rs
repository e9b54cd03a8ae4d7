//! In-memory piece source for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;
use crate::error::AssembleError;
use crate::net::{PieceBody, PieceSource};

#[derive(Debug, Clone)]
enum Scripted {
    Body { data: Vec<u8>, declared: Option<u64>, fail_at: Option<usize> },
    Fail(String),
}

#[derive(Debug, Default)]
struct Activity {
    active: AtomicUsize,
    max_active: AtomicUsize,
    total: AtomicUsize,
}

/// Serves piece bytes from memory and records how it was used
#[derive(Debug)]
pub(crate) struct MemorySource {
    responses: Mutex<HashMap<Url, Scripted>>,
    fetches: Mutex<HashMap<Url, usize>>,
    activity: Arc<Activity>,
    delay: Duration,
    chunk_size: usize,
}

impl MemorySource {
    pub(crate) fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
            activity: Arc::new(Activity::default()),
            delay: Duration::ZERO,
            chunk_size: 4096,
        }
    }

    /// Hold every body open for `delay` before its first chunk
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub(crate) fn insert(&self, url: &Url, data: Vec<u8>) {
        let declared = Some(data.len() as u64);
        self.responses.lock().unwrap().insert(url.clone(), Scripted::Body { data, declared, fail_at: None });
    }

    /// Serve `data` while announcing `declared` bytes
    pub(crate) fn insert_with_length(&self, url: &Url, data: Vec<u8>, declared: Option<u64>) {
        self.responses.lock().unwrap().insert(url.clone(), Scripted::Body { data, declared, fail_at: None });
    }

    /// Serve `data` but drop the connection once `after` bytes were read
    pub(crate) fn insert_failing_after(&self, url: &Url, data: Vec<u8>, after: usize) {
        let declared = Some(data.len() as u64);
        self.responses
            .lock()
            .unwrap()
            .insert(url.clone(), Scripted::Body { data, declared, fail_at: Some(after) });
    }

    /// Fail every fetch of `url` with a non-retryable error
    pub(crate) fn fail(&self, url: &Url, message: &str) {
        self.responses.lock().unwrap().insert(url.clone(), Scripted::Fail(message.to_string()));
    }

    pub(crate) fn fetches(&self, url: &Url) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_fetches(&self) -> usize {
        self.activity.total.load(Ordering::SeqCst)
    }

    /// Highest number of bodies open at once
    pub(crate) fn max_active(&self) -> usize {
        self.activity.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PieceSource for MemorySource {
    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<Box<dyn PieceBody>, AssembleError> {
        if cancel.is_cancelled() {
            return Err(AssembleError::cancelled(format!("request to {} cancelled", url)));
        }
        *self.fetches.lock().unwrap().entry(url.clone()).or_insert(0) += 1;
        self.activity.total.fetch_add(1, Ordering::SeqCst);

        let scripted = self.responses.lock().unwrap().get(url).cloned();
        let (data, declared, fail_at) = match scripted {
            Some(Scripted::Body { data, declared, fail_at }) => (data, declared, fail_at),
            Some(Scripted::Fail(message)) => {
                return Err(AssembleError::network_error(message, url.as_str(), false));
            }
            None => return Err(AssembleError::network_error("HTTP error code 404", url.as_str(), false)),
        };

        let now = self.activity.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.activity.max_active.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(MemoryBody {
            data: Bytes::from(data),
            declared,
            fail_at,
            url: url.to_string(),
            pos: 0,
            chunk_size: self.chunk_size,
            delay: self.delay,
            activity: Arc::clone(&self.activity),
        }))
    }
}

struct MemoryBody {
    data: Bytes,
    declared: Option<u64>,
    fail_at: Option<usize>,
    url: String,
    pos: usize,
    chunk_size: usize,
    delay: Duration,
    activity: Arc<Activity>,
}

#[async_trait]
impl PieceBody for MemoryBody {
    fn content_length(&self) -> Option<u64> {
        self.declared
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, AssembleError> {
        if self.pos == 0 && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_at.is_some_and(|at| self.pos >= at) {
            return Err(AssembleError::network_error("connection reset", &self.url, true));
        }
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(Some(chunk))
    }
}

impl Drop for MemoryBody {
    fn drop(&mut self) {
        self.activity.active.fetch_sub(1, Ordering::SeqCst);
    }
}
