pub mod config;
pub mod gateway;
pub mod http;
pub mod labels;
pub mod pipeline;

pub use config::MetricsConfig;
pub use http::MetricsServer;
pub use labels::{BoundedLabel, LabelPolicy};
