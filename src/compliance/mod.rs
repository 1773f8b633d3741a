mod repo;
mod repo_types;

pub use repo_types::{ComplianceResult, ComplianceStatus, NewComplianceResult};
