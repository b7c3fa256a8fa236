//! Recording stubs for pipeline tests.

#![allow(clippy::unwrap_used)]
#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use postbox_common::AppResult;
use serde_json::Value;

use crate::client::{ApTransport, DeliveryError, FetchError};
use crate::jobs::{DeliveryJob, FetchTicket, JobQueue, ValidateJob};

/// One delivery captured by [`StubTransport`].
#[derive(Debug, Clone)]
pub struct RecordedDelivery {
    pub inbox: String,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

/// In-memory [`ApTransport`] serving canned documents and recording every
/// fetch and delivery. Unknown URLs fetch as gone.
#[derive(Default)]
pub struct StubTransport {
    documents: Mutex<HashMap<String, Value>>,
    failing: Mutex<HashSet<String>>,
    fetches: Mutex<Vec<String>>,
    deliveries: Mutex<Vec<RecordedDelivery>>,
}

impl StubTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `document` for GETs of `url`.
    pub fn respond_with(&self, url: &str, document: Value) {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), document);
    }

    /// Make GETs of `url` fail transiently.
    pub fn fail_transiently(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Every fetched URL, in order.
    #[must_use]
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    #[must_use]
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    /// Every recorded delivery, in order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Inbox URLs touched by deliveries, in order.
    #[must_use]
    pub fn delivered_inboxes(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.inbox.clone())
            .collect()
    }
}

#[async_trait]
impl ApTransport for StubTransport {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        self.fetches.lock().unwrap().push(url.to_string());
        if self.failing.lock().unwrap().contains(url) {
            return Err(FetchError::Transient("stubbed failure".to_string()));
        }
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Gone("no such document".to_string()))
    }

    async fn deliver(
        &self,
        inbox: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> Result<(), DeliveryError> {
        let body = serde_json::from_slice(body).unwrap_or(Value::Null);
        self.deliveries.lock().unwrap().push(RecordedDelivery {
            inbox: inbox.to_string(),
            body,
            headers: headers.to_vec(),
        });
        Ok(())
    }
}

/// [`JobQueue`] that records enqueued jobs for the test to drain.
#[derive(Default)]
pub struct RecordingJobQueue {
    validations: Mutex<Vec<ValidateJob>>,
    fetches: Mutex<Vec<FetchTicket>>,
    deliveries: Mutex<Vec<DeliveryJob>>,
}

impl RecordingJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_validations(&self) -> Vec<ValidateJob> {
        std::mem::take(&mut self.validations.lock().unwrap())
    }

    pub fn take_fetches(&self) -> Vec<FetchTicket> {
        std::mem::take(&mut self.fetches.lock().unwrap())
    }

    pub fn take_deliveries(&self) -> Vec<DeliveryJob> {
        std::mem::take(&mut self.deliveries.lock().unwrap())
    }
}

#[async_trait]
impl JobQueue for RecordingJobQueue {
    async fn enqueue_validation(&self, job: ValidateJob) -> AppResult<()> {
        self.validations.lock().unwrap().push(job);
        Ok(())
    }

    async fn enqueue_fetch(&self, ticket: FetchTicket) -> AppResult<()> {
        self.fetches.lock().unwrap().push(ticket);
        Ok(())
    }

    async fn enqueue_delivery(&self, job: DeliveryJob) -> AppResult<()> {
        self.deliveries.lock().unwrap().push(job);
        Ok(())
    }
}
