pub mod domain {
    use std::fmt;
    use std::net::IpAddr;

    use serde::Serialize;

    /// One decoded IP packet as handed over by the capture side.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PacketDescriptor {
        pub src: IpAddr,
        pub dst: IpAddr,
        pub transport: Transport,
        pub length: usize,
    }

    impl PacketDescriptor {
        pub fn new(src: IpAddr, dst: IpAddr, transport: Transport, length: usize) -> Self {
            Self { src, dst, transport, length }
        }

        pub fn protocol(&self) -> Protocol {
            self.transport.protocol()
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Transport {
        Tcp { dst_port: u16, flags: TcpFlags },
        Udp { dst_port: u16 },
        Icmp { icmp_type: u8 },
        Other,
    }

    impl Transport {
        pub fn protocol(&self) -> Protocol {
            match self {
                Transport::Tcp { .. } => Protocol::Tcp,
                Transport::Udp { .. } => Protocol::Udp,
                Transport::Icmp { .. } => Protocol::Icmp,
                Transport::Other => Protocol::Other,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Protocol {
        Tcp,
        Udp,
        Icmp,
        Other,
    }

    impl fmt::Display for Protocol {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                Protocol::Tcp => "TCP",
                Protocol::Udp => "UDP",
                Protocol::Icmp => "ICMP",
                Protocol::Other => "OTHER",
            };
            f.write_str(name)
        }
    }

    /// TCP control bits. Displays as letters in `FSRPAUECN` order, so a
    /// SYN/ACK prints as `SA`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct TcpFlags {
        pub fin: bool,
        pub syn: bool,
        pub rst: bool,
        pub psh: bool,
        pub ack: bool,
        pub urg: bool,
        pub ece: bool,
        pub cwr: bool,
        pub ns: bool,
    }

    impl TcpFlags {
        pub fn syn() -> Self {
            Self { syn: true, ..Default::default() }
        }
    }

    impl fmt::Display for TcpFlags {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let bits = [
                (self.fin, 'F'),
                (self.syn, 'S'),
                (self.rst, 'R'),
                (self.psh, 'P'),
                (self.ack, 'A'),
                (self.urg, 'U'),
                (self.ece, 'E'),
                (self.cwr, 'C'),
                (self.ns, 'N'),
            ];
            for (set, letter) in bits {
                if set {
                    write!(f, "{}", letter)?;
                }
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Status {
        Normal,
        Suspicious,
        Malicious,
    }

    impl Status {
        pub fn is_alert(&self) -> bool {
            !matches!(self, Status::Normal)
        }

        pub fn as_str(&self) -> &'static str {
            match self {
                Status::Normal => "normal",
                Status::Suspicious => "suspicious",
                Status::Malicious => "malicious",
            }
        }
    }

    impl fmt::Display for Status {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Why a packet was escalated. Each reason carries its threat category so
    /// alerts never have to re-derive it from the message text.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Reason {
        SuspiciousPort(u16),
        PortScan(IpAddr),
        Dos(u64),
    }

    impl Reason {
        pub fn threat_type(&self) -> ThreatType {
            match self {
                Reason::PortScan(_) => ThreatType::PortScan,
                Reason::Dos(_) => ThreatType::DosAttack,
                Reason::SuspiciousPort(_) => ThreatType::SuspiciousAccess,
            }
        }
    }

    impl fmt::Display for Reason {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Reason::SuspiciousPort(port) => write!(f, "Access to suspicious port {}", port),
                Reason::PortScan(src) => write!(f, "Port scan detected from {}", src),
                Reason::Dos(count) => write!(f, "Potential DoS attack: {} packets", count),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub enum ThreatType {
        #[serde(rename = "Port Scan")]
        PortScan,
        #[serde(rename = "DoS Attack")]
        DosAttack,
        #[serde(rename = "Suspicious Access")]
        SuspiciousAccess,
        #[serde(rename = "Unknown Threat")]
        Unknown,
    }

    impl fmt::Display for ThreatType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                ThreatType::PortScan => "Port Scan",
                ThreatType::DosAttack => "DoS Attack",
                ThreatType::SuspiciousAccess => "Suspicious Access",
                ThreatType::Unknown => "Unknown Threat",
            };
            f.write_str(name)
        }
    }

    /// Transport-specific fields worth keeping next to a verdict.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Details {
        pub dst_port: Option<u16>,
        pub flags: Option<TcpFlags>,
        pub icmp_type: Option<u8>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ClassificationResult {
        pub src: IpAddr,
        pub dst: IpAddr,
        pub protocol: Protocol,
        pub status: Status,
        pub reason: Option<Reason>,
        pub details: Details,
        pub size: usize,
        pub pair_count: u64,
    }
}

pub mod dto {
    use chrono::{DateTime, Utc};
    use serde::Serialize;

    use super::domain::{Protocol, Status, ThreatType};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        Low,
        Medium,
        High,
        Critical,
    }

    impl Severity {
        pub fn from_status(status: Status) -> Self {
            match status {
                Status::Suspicious => Severity::Medium,
                Status::Malicious => Severity::High,
                Status::Normal => Severity::Low,
            }
        }
    }

    /// Lifecycle of an alert on the sink side; new alerts start unresolved.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum AlertStatus {
        Unresolved,
        Investigating,
        Resolved,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct DetailsDTO {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub dst_port: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub flags: Option<String>,
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        pub icmp_type: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub reason: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct LogRecord {
        pub timestamp: DateTime<Utc>,
        pub src_ip: String,
        pub dest_ip: String,
        pub protocol: Protocol,
        pub packet_size: usize,
        pub status: Status,
        pub details: DetailsDTO,
        pub user_id: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct AlertRecord {
        pub timestamp: DateTime<Utc>,
        pub severity: Severity,
        pub threat_type: ThreatType,
        pub src_ip: String,
        pub dest_ip: String,
        pub packet_count: u64,
        pub details: String,
        pub status: AlertStatus,
        pub user_id: String,
    }

    /// Named collections on the sink.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Collection {
        Alerts,
        PacketLogs,
    }

    impl Collection {
        pub fn as_str(&self) -> &'static str {
            match self {
                Collection::Alerts => "alerts",
                Collection::PacketLogs => "packet_logs",
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum Record {
        Alert(AlertRecord),
        Log(LogRecord),
    }

    impl Record {
        pub fn collection(&self) -> Collection {
            match self {
                Record::Alert(_) => Collection::Alerts,
                Record::Log(_) => Collection::PacketLogs,
            }
        }

        pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
            match self {
                Record::Alert(alert) => serde_json::to_value(alert),
                Record::Log(log) => serde_json::to_value(log),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::domain::*;
    use super::dto::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn tcp_flags_render_in_fixed_order() {
        let synack = TcpFlags { syn: true, ack: true, ..Default::default() };
        assert_eq!(synack.to_string(), "SA");
        let xmas = TcpFlags { fin: true, psh: true, urg: true, ..Default::default() };
        assert_eq!(xmas.to_string(), "FPU");
        assert_eq!(TcpFlags::default().to_string(), "");
    }

    #[test]
    fn reason_text_and_threat_type() {
        let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(Reason::SuspiciousPort(22).to_string(), "Access to suspicious port 22");
        assert_eq!(Reason::PortScan(src).to_string(), "Port scan detected from 10.0.0.7");
        assert_eq!(Reason::Dos(101).to_string(), "Potential DoS attack: 101 packets");
        assert_eq!(Reason::Dos(101).threat_type(), ThreatType::DosAttack);
        assert_eq!(Reason::PortScan(src).threat_type(), ThreatType::PortScan);
        assert_eq!(Reason::SuspiciousPort(22).threat_type(), ThreatType::SuspiciousAccess);
    }

    #[test]
    fn wire_names_match_sink_schema() {
        assert_eq!(serde_json::to_value(ThreatType::DosAttack).unwrap(), "DoS Attack");
        assert_eq!(serde_json::to_value(Severity::Medium).unwrap(), "medium");
        assert_eq!(serde_json::to_value(Protocol::Icmp).unwrap(), "ICMP");
        assert_eq!(serde_json::to_value(Status::Malicious).unwrap(), "malicious");
        assert_eq!(serde_json::to_value(AlertStatus::Unresolved).unwrap(), "unresolved");
    }

    #[test]
    fn details_omit_absent_fields() {
        let details = DetailsDTO { dst_port: None, flags: None, icmp_type: Some(8), reason: None };
        assert_eq!(serde_json::to_value(&details).unwrap(), serde_json::json!({ "type": 8 }));
    }
}
