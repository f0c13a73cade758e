use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

use crate::config::ThresholdPolicy;
use crate::detection::Classifier;
use crate::dispatch::Dispatcher;
use crate::models::domain::{ClassificationResult, PacketDescriptor, Protocol, Status, ThreatType};
use crate::tracker::TrafficTracker;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub protocol_counts: BTreeMap<String, u64>,
    pub status_counts: BTreeMap<String, u64>,
    pub threat_counts: BTreeMap<String, u64>,
    pub resets: u64,
}

impl NetworkStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, result: &ClassificationResult) {
        self.total_packets += 1;
        self.total_bytes += result.size as u64;
        *self.protocol_counts.entry(result.protocol.to_string()).or_insert(0) += 1;
        *self.status_counts.entry(result.status.to_string()).or_insert(0) += 1;
        if result.status.is_alert() {
            let threat = result.reason.map_or(ThreatType::Unknown, |r| r.threat_type());
            *self.threat_counts.entry(threat.to_string()).or_insert(0) += 1;
        }
    }

    pub fn count(&self, status: Status) -> u64 {
        self.status_counts.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn protocol_count(&self, protocol: Protocol) -> u64 {
        self.protocol_counts.get(&protocol.to_string()).copied().unwrap_or(0)
    }

    pub fn alerts(&self) -> u64 {
        self.count(Status::Suspicious) + self.count(Status::Malicious)
    }
}

impl fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Packets analysed: {} ({} bytes)", self.total_packets, self.total_bytes)?;
        writeln!(
            f,
            "Verdicts: {} normal, {} suspicious, {} malicious",
            self.count(Status::Normal),
            self.count(Status::Suspicious),
            self.count(Status::Malicious),
        )?;
        for (protocol, count) in &self.protocol_counts {
            writeln!(f, "  {:<6} {}", protocol, count)?;
        }
        for (threat, count) in &self.threat_counts {
            writeln!(f, "  {}: {}", threat, count)?;
        }
        write!(f, "Counter resets: {}", self.resets)
    }
}

/// One display line per packet, e.g.
/// `[SUSPICIOUS] 10.0.0.5 -> 10.0.0.9 (TCP, 60 bytes)`.
pub fn packet_line(result: &ClassificationResult) -> String {
    format!(
        "[{}] {} -> {} ({}, {} bytes)",
        result.status.as_str().to_uppercase(),
        result.src,
        result.dst,
        result.protocol,
        result.size
    )
}

/// The per-packet pipeline. Packets are handled strictly one at a time:
/// classify, report, then check whether the epoch is over.
pub struct Monitor {
    classifier: Classifier,
    tracker: TrafficTracker,
    dispatcher: Dispatcher,
    stats: NetworkStats,
}

impl Monitor {
    pub fn new(policy: ThresholdPolicy, dispatcher: Dispatcher, now: Instant) -> Self {
        let tracker = TrafficTracker::new(policy.reset_interval, now);
        Self {
            classifier: Classifier::new(policy),
            tracker,
            dispatcher,
            stats: NetworkStats::new(),
        }
    }

    pub fn process(&mut self, packet: &PacketDescriptor, now: Instant) -> ClassificationResult {
        let result = self.classifier.classify(packet, &mut self.tracker);

        info!("{}", packet_line(&result));
        if result.status.is_alert() {
            let threat = result.reason.map_or(ThreatType::Unknown, |r| r.threat_type());
            warn!(
                reason = ?result.reason.map(|r| r.to_string()),
                "[ALERT] {}: {} -> {}",
                threat,
                result.src,
                result.dst
            );
        }

        self.dispatcher.dispatch(&result, &self.tracker);
        self.stats.update(&result);

        if self.tracker.maybe_reset(now) {
            self.stats.resets += 1;
        }
        result
    }

    /// Drain `rx` until it disconnects or `running` is cleared.
    pub fn run(&mut self, rx: &Receiver<PacketDescriptor>, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(packet) => {
                    self.process(&packet, Instant::now());
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn tracker(&self) -> &TrafficTracker {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn into_dispatcher(self) -> Dispatcher {
        self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchSettings, DEFAULT_LOG_FILTER};
    use crate::models::domain::{TcpFlags, Transport};
    use crossbeam_channel::unbounded;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::EnvFilter;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn tcp_to(dst_port: u16) -> PacketDescriptor {
        let transport = Transport::Tcp {
            dst_port,
            flags: TcpFlags::syn(),
        };
        PacketDescriptor::new(ip(5), ip(9), transport, 60)
    }

    fn monitor(policy: ThresholdPolicy) -> Monitor {
        let dispatcher = Dispatcher::detached(&DispatchSettings::default());
        Monitor::new(policy, dispatcher, Instant::now())
    }

    #[derive(Clone, Default)]
    struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stats_follow_verdicts() {
        let mut monitor = monitor(ThresholdPolicy::default());
        let now = Instant::now();
        let ssh = Transport::Tcp {
            dst_port: 22,
            flags: TcpFlags::syn(),
        };
        monitor.process(&PacketDescriptor::new(ip(5), ip(9), ssh, 60), now);
        let dns = Transport::Udp { dst_port: 53 };
        monitor.process(&PacketDescriptor::new(ip(5), ip(9), dns, 90), now);

        let stats = monitor.stats();
        assert_eq!(stats.total_packets, 2);
        assert_eq!(stats.total_bytes, 150);
        assert_eq!(stats.count(Status::Suspicious), 1);
        assert_eq!(stats.count(Status::Normal), 1);
        assert_eq!(stats.protocol_count(Protocol::Udp), 1);
        assert_eq!(stats.alerts(), 1);
        assert_eq!(stats.threat_counts.get("Suspicious Access"), Some(&1));
    }

    #[test]
    fn reset_is_checked_after_each_packet() {
        let policy = ThresholdPolicy {
            reset_interval: Duration::from_secs(5),
            ..Default::default()
        };
        let start = Instant::now();
        let dispatcher = Dispatcher::detached(&DispatchSettings::default());
        let mut monitor = Monitor::new(policy, dispatcher, start);
        let packet = PacketDescriptor::new(ip(5), ip(9), Transport::Other, 40);

        monitor.process(&packet, start);
        let result = monitor.process(&packet, start + Duration::from_secs(6));
        // The packet that closes the epoch is still counted in it.
        assert_eq!(result.pair_count, 2);
        assert_eq!(monitor.stats().resets, 1);
        let result = monitor.process(&packet, start + Duration::from_secs(7));
        assert_eq!(result.pair_count, 1);
    }

    #[test]
    fn run_stops_when_sender_disconnects() {
        let mut monitor = monitor(ThresholdPolicy::default());
        let (tx, rx) = unbounded();
        for _ in 0..3 {
            let ping = Transport::Icmp { icmp_type: 8 };
            tx.send(PacketDescriptor::new(ip(5), ip(9), ping, 84)).unwrap();
        }
        drop(tx);
        monitor.run(&rx, &AtomicBool::new(true));
        assert_eq!(monitor.stats().total_packets, 3);
        assert_eq!(monitor.tracker().pair_count(ip(5), ip(9)), 3);
    }

    #[test]
    fn every_packet_is_displayed_under_default_filter() {
        let output = CapturedOutput::default();
        let writer = output.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(DEFAULT_LOG_FILTER))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let mut monitor = monitor(ThresholdPolicy::default());
        tracing::subscriber::with_default(subscriber, || {
            let dns = Transport::Udp { dst_port: 53 };
            monitor.process(&PacketDescriptor::new(ip(5), ip(9), dns, 90), Instant::now());
            monitor.process(&tcp_to(22), Instant::now());
        });

        let text = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("[NORMAL] 10.0.0.5 -> 10.0.0.9 (UDP, 90 bytes)"), "{}", text);
        assert!(text.contains("[SUSPICIOUS] 10.0.0.5 -> 10.0.0.9 (TCP, 60 bytes)"), "{}", text);
        assert!(text.contains("[ALERT] Suspicious Access: 10.0.0.5 -> 10.0.0.9"), "{}", text);
    }

    #[test]
    fn packet_line_uses_uppercase_status() {
        let mut monitor = monitor(ThresholdPolicy {
            dos_threshold: 1,
            ..Default::default()
        });
        monitor.process(&tcp_to(443), Instant::now());
        let result = monitor.process(&tcp_to(443), Instant::now());
        assert_eq!(
            packet_line(&result),
            "[MALICIOUS] 10.0.0.5 -> 10.0.0.9 (TCP, 60 bytes)"
        );
    }
}
