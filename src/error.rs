use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("insufficient privileges to capture on {device}: {message}")]
    PermissionDenied { device: String, message: String },

    #[error("no capture device available")]
    NoDevice,

    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),
}

impl CaptureError {
    /// libpcap reports privilege problems as plain text, so sort them out of
    /// the generic errors by message.
    pub fn classify(device: &str, err: pcap::Error) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();
        if lower.contains("permission") || lower.contains("not permitted") {
            CaptureError::PermissionDenied { device: device.to_string(), message }
        } else {
            CaptureError::Pcap(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sink rejected record ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("invalid port list {0:?}")]
    InvalidPorts(String),
}
