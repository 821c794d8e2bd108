pub mod metrics;

pub use metrics::{MetricSink, MetricsContext};
