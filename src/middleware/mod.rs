//! Request-level middleware: structured request logging with request ids, and
//! per-endpoint metrics.

pub mod logging;
pub mod metrics;

pub use logging::{RequestId, RequestLogging, REQUEST_ID_HEADER};
pub use metrics::MetricsMiddleware;
