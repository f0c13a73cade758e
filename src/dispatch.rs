use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::config::{DispatchSettings, OverflowPolicy};
use crate::db::Sink;
use crate::models::domain::{ClassificationResult, ThreatType};
use crate::models::dto::{AlertRecord, AlertStatus, DetailsDTO, LogRecord, Record, Severity};
use crate::tracker::TrafficTracker;

pub fn to_log_record(result: &ClassificationResult, owner: &str) -> LogRecord {
    LogRecord {
        timestamp: Utc::now(),
        src_ip: result.src.to_string(),
        dest_ip: result.dst.to_string(),
        protocol: result.protocol,
        packet_size: result.size,
        status: result.status,
        details: DetailsDTO {
            dst_port: result.details.dst_port,
            flags: result.details.flags.map(|f| f.to_string()),
            icmp_type: result.details.icmp_type,
            reason: result.reason.map(|r| r.to_string()),
        },
        user_id: owner.to_string(),
    }
}

/// Build an alert for a suspicious or malicious result. The packet count is
/// read from the tracker now, not taken from the classification.
pub fn to_alert_record(
    result: &ClassificationResult,
    tracker: &TrafficTracker,
    owner: &str,
) -> Option<AlertRecord> {
    if !result.status.is_alert() {
        return None;
    }

    let (threat_type, details) = match result.reason {
        Some(reason) => (reason.threat_type(), reason.to_string()),
        None => (ThreatType::Unknown, "Suspicious activity detected".to_string()),
    };

    Some(AlertRecord {
        timestamp: Utc::now(),
        severity: Severity::from_status(result.status),
        threat_type,
        src_ip: result.src.to_string(),
        dest_ip: result.dst.to_string(),
        packet_count: tracker.pair_count(result.src, result.dst),
        details,
        status: AlertStatus::Unresolved,
        user_id: owner.to_string(),
    })
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Hands records to a sink on a background thread through a bounded queue.
///
/// `enqueue` never blocks: when the queue is full the overflow policy decides
/// whether the oldest queued record or the new one is dropped.
pub struct Dispatcher {
    owner: Option<String>,
    overflow: OverflowPolicy,
    tx: Sender<Record>,
    // Kept so the producer can evict the oldest record on overflow.
    rx: Receiver<Record>,
    counters: Arc<Counters>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start a worker thread that drains the queue into `sink`.
    pub fn spawn(settings: &DispatchSettings, sink: Box<dyn Sink>) -> Self {
        let mut dispatcher = Self::detached(settings);
        let rx = dispatcher.rx.clone();
        let counters = dispatcher.counters.clone();
        let worker = thread::Builder::new()
            .name("sink".into())
            .spawn(move || drain(rx, sink, counters));
        match worker {
            Ok(handle) => dispatcher.worker = Some(handle),
            Err(e) => warn!("failed to start sink worker, records will queue and drop: {}", e),
        }
        dispatcher
    }

    /// A dispatcher with no worker; records stay queued until drained.
    pub fn detached(settings: &DispatchSettings) -> Self {
        let (tx, rx) = bounded(settings.queue_capacity.max(1));
        Self {
            owner: settings.owner.clone(),
            overflow: settings.overflow,
            tx,
            rx,
            counters: Arc::new(Counters::default()),
            worker: None,
        }
    }

    /// Queue the log record and, for escalated results, the alert. Does
    /// nothing without an owner identity.
    pub fn dispatch(&self, result: &ClassificationResult, tracker: &TrafficTracker) {
        let Some(owner) = self.owner.as_deref() else {
            return;
        };
        self.enqueue(Record::Log(to_log_record(result, owner)));
        if let Some(alert) = to_alert_record(result, tracker, owner) {
            self.enqueue(Record::Alert(alert));
        }
    }

    pub fn enqueue(&self, record: Record) {
        let mut record = record;
        loop {
            match self.tx.try_send(record) {
                Ok(()) => {
                    self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(TrySendError::Full(rejected)) => match self.overflow {
                    OverflowPolicy::DropNewest => {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            collection = rejected.collection().as_str(),
                            "sink queue full, dropped new record"
                        );
                        return;
                    }
                    OverflowPolicy::DropOldest => {
                        if let Ok(evicted) = self.rx.try_recv() {
                            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                collection = evicted.collection().as_str(),
                                "sink queue full, dropped oldest record"
                            );
                        }
                        record = rejected;
                    }
                },
                Err(TrySendError::Disconnected(_)) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    /// Remove everything still queued. Used when there is no worker.
    pub fn drain_pending(&self) -> Vec<Record> {
        self.rx.try_iter().collect()
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Stop accepting records and wait for the worker to flush the queue.
    pub fn close(mut self) -> DispatchStats {
        let worker = self.worker.take();
        let counters = self.counters.clone();
        drop(self);
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!("sink worker panicked");
            }
        }
        counters.snapshot()
    }
}

fn drain(rx: Receiver<Record>, sink: Box<dyn Sink>, counters: Arc<Counters>) {
    for record in rx {
        match sink.submit(&record) {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(collection = record.collection().as_str(), "Error sending to sink: {}", e);
            }
        }
    }
}
