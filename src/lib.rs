pub mod config;
pub mod db;
pub mod detection;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod monitor;
pub mod sniff;
pub mod tracker;

pub use config::{Settings, ThresholdPolicy};
pub use detection::Classifier;
pub use dispatch::Dispatcher;
pub use monitor::Monitor;
pub use tracker::TrafficTracker;
