use crate::config::ThresholdPolicy;
use crate::models::domain::{
    ClassificationResult, Details, PacketDescriptor, Reason, Status, Transport,
};
use crate::tracker::TrafficTracker;

/// Applies the escalation rules to one packet at a time.
#[derive(Debug, Clone)]
pub struct Classifier {
    policy: ThresholdPolicy,
}

impl Classifier {
    pub fn new(policy: ThresholdPolicy) -> Self {
        Self { policy }
    }

    /// Classify `packet`, counting it in `tracker` exactly once.
    ///
    /// Checks escalate monotonically: sensitive port (suspicious), then port
    /// scan (malicious), then DoS (malicious). A later check that fires
    /// replaces the earlier reason, so DoS wins when it fires together with a
    /// port scan.
    pub fn classify(
        &self,
        packet: &PacketDescriptor,
        tracker: &mut TrafficTracker,
    ) -> ClassificationResult {
        let mut status = Status::Normal;
        let mut reason = None;
        let mut details = Details::default();

        let observation = match packet.transport {
            Transport::Tcp { dst_port, flags } => {
                details.dst_port = Some(dst_port);
                details.flags = Some(flags);

                if self.policy.is_sensitive(dst_port) {
                    status = Status::Suspicious;
                    reason = Some(Reason::SuspiciousPort(dst_port));
                }

                let observation = tracker.record(packet.src, packet.dst, Some(dst_port));
                if observation.distinct_ports > self.policy.port_scan_threshold {
                    status = Status::Malicious;
                    reason = Some(Reason::PortScan(packet.src));
                }
                observation
            }
            Transport::Udp { dst_port } => {
                details.dst_port = Some(dst_port);
                tracker.record(packet.src, packet.dst, None)
            }
            Transport::Icmp { icmp_type } => {
                details.icmp_type = Some(icmp_type);
                tracker.record(packet.src, packet.dst, None)
            }
            Transport::Other => tracker.record(packet.src, packet.dst, None),
        };

        if observation.pair_count > self.policy.dos_threshold {
            status = Status::Malicious;
            reason = Some(Reason::Dos(observation.pair_count));
        }

        ClassificationResult {
            src: packet.src,
            dst: packet.dst,
            protocol: packet.protocol(),
            status,
            reason,
            details,
            size: packet.length,
            pair_count: observation.pair_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain::{Protocol, TcpFlags};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::{Duration, Instant};

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn tcp(src: IpAddr, dst: IpAddr, dst_port: u16) -> PacketDescriptor {
        PacketDescriptor::new(src, dst, Transport::Tcp { dst_port, flags: TcpFlags::syn() }, 60)
    }

    fn setup(policy: ThresholdPolicy) -> (Classifier, TrafficTracker) {
        let tracker = TrafficTracker::new(policy.reset_interval, Instant::now());
        (Classifier::new(policy), tracker)
    }

    #[test]
    fn plain_tcp_is_normal() {
        let (classifier, mut tracker) = setup(ThresholdPolicy::default());
        let result = classifier.classify(&tcp(ip(5), ip(9), 443), &mut tracker);
        assert_eq!(result.status, Status::Normal);
        assert_eq!(result.reason, None);
        assert_eq!(result.protocol, Protocol::Tcp);
        assert_eq!(result.details.dst_port, Some(443));
        assert_eq!(result.details.flags, Some(TcpFlags::syn()));
        assert_eq!(result.pair_count, 1);
        assert_eq!(result.size, 60);
    }

    #[test]
    fn sensitive_port_is_suspicious() {
        let (classifier, mut tracker) = setup(ThresholdPolicy::default());
        let result = classifier.classify(&tcp(ip(5), ip(9), 22), &mut tracker);
        assert_eq!(result.status, Status::Suspicious);
        assert_eq!(result.reason, Some(Reason::SuspiciousPort(22)));
    }

    #[test]
    fn sensitive_port_over_udp_is_not_flagged() {
        let (classifier, mut tracker) = setup(ThresholdPolicy::default());
        let packet = PacketDescriptor::new(ip(5), ip(9), Transport::Udp { dst_port: 22 }, 80);
        let result = classifier.classify(&packet, &mut tracker);
        assert_eq!(result.status, Status::Normal);
        assert_eq!(tracker.distinct_ports(ip(5)), 0);
    }

    #[test]
    fn icmp_keeps_type_only() {
        let (classifier, mut tracker) = setup(ThresholdPolicy::default());
        let packet = PacketDescriptor::new(ip(5), ip(9), Transport::Icmp { icmp_type: 8 }, 84);
        let result = classifier.classify(&packet, &mut tracker);
        assert_eq!(result.protocol, Protocol::Icmp);
        assert_eq!(
            result.details,
            Details {
                icmp_type: Some(8),
                ..Default::default()
            }
        );
    }

    #[test]
    fn pair_counted_once_per_packet_for_every_protocol() {
        let (classifier, mut tracker) = setup(ThresholdPolicy::default());
        classifier.classify(&tcp(ip(5), ip(9), 80), &mut tracker);
        let udp = PacketDescriptor::new(ip(5), ip(9), Transport::Udp { dst_port: 53 }, 70);
        let icmp = PacketDescriptor::new(ip(5), ip(9), Transport::Icmp { icmp_type: 0 }, 70);
        let other = PacketDescriptor::new(ip(5), ip(9), Transport::Other, 70);
        classifier.classify(&udp, &mut tracker);
        classifier.classify(&icmp, &mut tracker);
        let result = classifier.classify(&other, &mut tracker);
        assert_eq!(result.pair_count, 4);
        assert_eq!(result.protocol, Protocol::Other);
    }

    #[test]
    fn crossing_dos_threshold_stays_malicious() {
        let policy = ThresholdPolicy {
            dos_threshold: 3,
            ..Default::default()
        };
        let (classifier, mut tracker) = setup(policy);
        for n in 1..=3 {
            let result = classifier.classify(&tcp(ip(5), ip(9), 443), &mut tracker);
            assert_eq!(result.status, Status::Normal, "packet {}", n);
        }
        for n in 4..=6 {
            let result = classifier.classify(&tcp(ip(5), ip(9), 443), &mut tracker);
            assert_eq!(result.status, Status::Malicious);
            assert_eq!(result.reason, Some(Reason::Dos(n)));
        }
    }

    #[test]
    fn port_scan_overrides_suspicious_port() {
        let policy = ThresholdPolicy {
            port_scan_threshold: 2,
            ..Default::default()
        };
        let (classifier, mut tracker) = setup(policy);
        classifier.classify(&tcp(ip(7), ip(9), 1000), &mut tracker);
        classifier.classify(&tcp(ip(7), ip(9), 1001), &mut tracker);
        let result = classifier.classify(&tcp(ip(7), ip(9), 22), &mut tracker);
        assert_eq!(result.status, Status::Malicious);
        assert_eq!(result.reason, Some(Reason::PortScan(ip(7))));

        // Any later TCP packet from the scanner stays flagged, even to a
        // port it already touched.
        let result = classifier.classify(&tcp(ip(7), ip(10), 1000), &mut tracker);
        assert_eq!(result.reason, Some(Reason::PortScan(ip(7))));
    }

    #[test]
    fn dos_replaces_suspicious_port_reason() {
        let policy = ThresholdPolicy {
            dos_threshold: 3,
            ..Default::default()
        };
        let (classifier, mut tracker) = setup(policy);
        for _ in 1..=3 {
            let result = classifier.classify(&tcp(ip(5), ip(9), 22), &mut tracker);
            assert_eq!(result.status, Status::Suspicious);
            assert_eq!(result.reason, Some(Reason::SuspiciousPort(22)));
        }
        for n in 4..=5 {
            let result = classifier.classify(&tcp(ip(5), ip(9), 22), &mut tracker);
            assert_eq!(result.status, Status::Malicious);
            assert_eq!(result.reason, Some(Reason::Dos(n)));
        }
    }

    #[test]
    fn dos_reason_wins_over_port_scan() {
        let policy = ThresholdPolicy {
            dos_threshold: 2,
            port_scan_threshold: 2,
            ..Default::default()
        };
        let (classifier, mut tracker) = setup(policy);
        classifier.classify(&tcp(ip(7), ip(9), 1), &mut tracker);
        classifier.classify(&tcp(ip(7), ip(9), 2), &mut tracker);
        let result = classifier.classify(&tcp(ip(7), ip(9), 3), &mut tracker);
        assert_eq!(result.status, Status::Malicious);
        assert_eq!(result.reason, Some(Reason::Dos(3)));
    }

    #[test]
    fn counters_restart_after_reset() {
        let policy = ThresholdPolicy {
            dos_threshold: 1,
            reset_interval: Duration::from_secs(1),
            ..Default::default()
        };
        let start = Instant::now();
        let classifier = Classifier::new(policy.clone());
        let mut tracker = TrafficTracker::new(policy.reset_interval, start);
        classifier.classify(&tcp(ip(5), ip(9), 443), &mut tracker);
        let result = classifier.classify(&tcp(ip(5), ip(9), 443), &mut tracker);
        assert_eq!(result.status, Status::Malicious);

        assert!(tracker.maybe_reset(start + Duration::from_secs(2)));
        let result = classifier.classify(&tcp(ip(5), ip(9), 443), &mut tracker);
        assert_eq!(result.status, Status::Normal);
        assert_eq!(result.pair_count, 1);
        assert_eq!(tracker.distinct_ports(ip(5)), 1);
    }
}
