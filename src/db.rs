use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::error::SinkError;
use crate::models::dto::{Collection, Record};

/// Somewhere to store alert and log records.
pub trait Sink: Send + Sync {
    fn submit(&self, record: &Record) -> Result<(), SinkError>;
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn submit(&self, record: &Record) -> Result<(), SinkError> {
        (**self).submit(record)
    }
}

/// REST sink speaking the PostgREST insert convention:
/// `POST {base}/rest/v1/{collection}` with a JSON body.
#[derive(Clone)]
pub struct RestSink {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestSink {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn endpoint(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection.as_str())
    }
}

impl Sink for RestSink {
    fn submit(&self, record: &Record) -> Result<(), SinkError> {
        let body = record.to_json()?;
        let url = self.endpoint(record.collection());

        let mut request = self
            .client
            .post(&url)
            .header("Prefer", "return=minimal")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            debug!(%url, "record stored");
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            Err(SinkError::Rejected { status: status.as_u16(), body })
        }
    }
}

/// Keeps submitted records in memory. Handy for dry runs and tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.records()
            .iter()
            .filter(|r| r.collection() == collection)
            .count()
    }
}

impl Sink for MemorySink {
    fn submit(&self, record: &Record) -> Result<(), SinkError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}
