//! RBAC interception: rules, pending queue, metrics, and the pipeline

pub mod interceptor;
pub mod metrics;
pub mod pending;
pub mod rules;

pub use interceptor::{RbacInterceptor, RulesUpdate};
pub use metrics::{RbacMetrics, RbacMetricsSnapshot};
pub use pending::{PendingQueue, PendingValidation};
pub use rules::{RuleMatch, RuleSet};
