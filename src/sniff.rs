// src/sniff.rs
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap::{Active, Activated, Capture, Device, Linktype, Offline};
use tracing::{debug, info, warn};

use crate::config::CaptureSource;
use crate::error::CaptureError;
use crate::models::domain::{PacketDescriptor, TcpFlags, Transport};

const SNAPLEN: i32 = 65535;
const READ_TIMEOUT_MS: i32 = 500;

// BSD loopback: 4-byte address family in host byte order.
const NULL_HEADER_LEN: usize = 4;
// Linux cooked capture: protocol type in the last two bytes of 16.
const SLL_HEADER_LEN: usize = 16;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub captured: u64,
    /// Frames without an IP layer, or that failed to decode.
    pub skipped: u64,
}

enum Handle {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

/// An opened capture, ready to feed descriptors into a channel.
pub struct Sniffer {
    handle: Handle,
    linktype: Linktype,
    label: String,
}

impl Sniffer {
    /// Open the capture and install the BPF filter. Privilege problems show
    /// up here, before any thread is started.
    pub fn open(source: &CaptureSource, filter: &str) -> Result<Self, CaptureError> {
        let sniffer = match source {
            CaptureSource::Device(name) => {
                let device = match name {
                    Some(name) => Device::from(name.as_str()),
                    None => Device::lookup()?.ok_or(CaptureError::NoDevice)?,
                };
                let label = device.name.clone();
                let mut cap =
                    create_capture(device).map_err(|e| CaptureError::classify(&label, e))?;
                cap.filter(filter, true)
                    .map_err(|e| CaptureError::classify(&label, e))?;
                let linktype = cap.get_datalink();
                Self {
                    handle: Handle::Live(cap),
                    linktype,
                    label,
                }
            }
            CaptureSource::File(path) => {
                let label = path.display().to_string();
                let mut cap = Capture::from_file(path)?;
                cap.filter(filter, true)?;
                let linktype = cap.get_datalink();
                Self {
                    handle: Handle::Offline(cap),
                    linktype,
                    label,
                }
            }
        };

        if !is_supported(sniffer.linktype) {
            warn!(
                source = %sniffer.label,
                linktype = ?sniffer.linktype,
                "unsupported link type, every frame from this source will be skipped"
            );
        }
        Ok(sniffer)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Read packets until `running` is cleared, the file ends or the
    /// receiving side hangs up.
    pub fn run(
        self,
        sender: Sender<PacketDescriptor>,
        running: Arc<AtomicBool>,
    ) -> Result<CaptureSummary, CaptureError> {
        info!(source = %self.label, linktype = ?self.linktype, "capture started");
        match self.handle {
            Handle::Live(mut cap) => process_packets(&mut cap, self.linktype, &sender, &running),
            Handle::Offline(mut cap) => {
                process_packets(&mut cap, self.linktype, &sender, &running)
            }
        }
    }
}

fn create_capture(device: Device) -> Result<Capture<Active>, pcap::Error> {
    Capture::from_device(device)?
        .promisc(true)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .immediate_mode(true)
        .open()
}

fn process_packets<T: Activated + ?Sized>(
    cap: &mut Capture<T>,
    linktype: Linktype,
    sender: &Sender<PacketDescriptor>,
    running: &AtomicBool,
) -> Result<CaptureSummary, CaptureError> {
    let mut summary = CaptureSummary::default();
    while running.load(Ordering::SeqCst) {
        let packet = match cap.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(e.into()),
        };

        match decode(linktype, packet.data, packet.header.len as usize) {
            Some(descriptor) => {
                summary.captured += 1;
                if sender.send(descriptor).is_err() {
                    debug!("packet receiver closed, stopping capture");
                    break;
                }
            }
            None => summary.skipped += 1,
        }
    }
    Ok(summary)
}

/// Link types `decode` knows how to strip down to the IP header.
pub fn is_supported(linktype: Linktype) -> bool {
    matches!(
        linktype,
        Linktype::ETHERNET
            | Linktype::RAW
            | Linktype(12)
            | Linktype::NULL
            | Linktype::LOOP
            | Linktype::LINUX_SLL
    )
}

/// Turn a captured frame into a descriptor. Frames without an IP layer, or
/// from an unsupported link type, yield `None`.
pub fn decode(linktype: Linktype, data: &[u8], length: usize) -> Option<PacketDescriptor> {
    let sliced = match linktype {
        Linktype::ETHERNET => SlicedPacket::from_ethernet(data).ok()?,
        Linktype::RAW | Linktype(12) => SlicedPacket::from_ip(data).ok()?,
        Linktype::NULL | Linktype::LOOP => {
            SlicedPacket::from_ip(data.get(NULL_HEADER_LEN..)?).ok()?
        }
        Linktype::LINUX_SLL => {
            let header = data.get(..SLL_HEADER_LEN)?;
            let ethertype = u16::from_be_bytes([header[14], header[15]]);
            if ethertype != ETHERTYPE_IPV4 && ethertype != ETHERTYPE_IPV6 {
                return None;
            }
            SlicedPacket::from_ip(&data[SLL_HEADER_LEN..]).ok()?
        }
        _ => return None,
    };

    let (src, dst) = match sliced.net? {
        NetSlice::Ipv4(ipv4) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        NetSlice::Ipv6(ipv6) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
    };

    let transport = match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => Transport::Tcp {
            dst_port: tcp.destination_port(),
            flags: TcpFlags {
                fin: tcp.fin(),
                syn: tcp.syn(),
                rst: tcp.rst(),
                psh: tcp.psh(),
                ack: tcp.ack(),
                urg: tcp.urg(),
                ece: tcp.ece(),
                cwr: tcp.cwr(),
                ns: tcp.ns(),
            },
        },
        Some(TransportSlice::Udp(udp)) => Transport::Udp {
            dst_port: udp.destination_port(),
        },
        Some(TransportSlice::Icmpv4(icmp)) => Transport::Icmp {
            icmp_type: icmp.type_u8(),
        },
        Some(TransportSlice::Icmpv6(icmp)) => Transport::Icmp {
            icmp_type: icmp.type_u8(),
        },
        _ => Transport::Other,
    };

    Some(PacketDescriptor::new(src, dst, transport, length))
}
