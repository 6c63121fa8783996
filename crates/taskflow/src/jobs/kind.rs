//! Closed set of built-in job kinds and their typed payloads.
//!
//! The store and the registry stay string-keyed, but everything the decomposer emits is a
//! [`JobSpec`], and a stored job can be parsed back into one with [`JobSpec::from_parts`].
//! Dispatching on a `JobSpec` is an exhaustive `match`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::jobs::model::NewJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    DependencyMap,
    DiscoverTests,
    SecurityScan,
    ComplexityGauge,
    AuditDimension,
    ContextSearch,
    Analyze,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        JobKind::DependencyMap,
        JobKind::DiscoverTests,
        JobKind::SecurityScan,
        JobKind::ComplexityGauge,
        JobKind::AuditDimension,
        JobKind::ContextSearch,
        JobKind::Analyze,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::DependencyMap => "dependency_map",
            JobKind::DiscoverTests => "discover_tests",
            JobKind::SecurityScan => "security_scan",
            JobKind::ComplexityGauge => "complexity_gauge",
            JobKind::AuditDimension => "audit_dimension",
            JobKind::ContextSearch => "context_search",
            JobKind::Analyze => "analyze",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        JobKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Cheap checks run ahead of expensive ones when workers are scarce.
    pub fn default_priority(&self) -> i32 {
        match self {
            JobKind::DependencyMap | JobKind::DiscoverTests | JobKind::ContextSearch => 10,
            JobKind::SecurityScan => 9,
            JobKind::ComplexityGauge => 8,
            JobKind::AuditDimension | JobKind::Analyze => 5,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetPayload {
    /// File or directory to inspect; `None` means the whole project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDimension {
    Security,
    Performance,
    CodeQuality,
    Architecture,
}

impl AuditDimension {
    pub const ALL: [AuditDimension; 4] = [
        AuditDimension::Security,
        AuditDimension::Performance,
        AuditDimension::CodeQuality,
        AuditDimension::Architecture,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionPayload {
    pub dimension: AuditDimension,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzePayload {
    pub request: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobSpec {
    DependencyMap(TargetPayload),
    DiscoverTests(TargetPayload),
    SecurityScan(TargetPayload),
    ComplexityGauge(TargetPayload),
    AuditDimension(DimensionPayload),
    ContextSearch(QueryPayload),
    Analyze(AnalyzePayload),
}

impl JobSpec {
    pub fn kind(&self) -> JobKind {
        match self {
            JobSpec::DependencyMap(_) => JobKind::DependencyMap,
            JobSpec::DiscoverTests(_) => JobKind::DiscoverTests,
            JobSpec::SecurityScan(_) => JobKind::SecurityScan,
            JobSpec::ComplexityGauge(_) => JobKind::ComplexityGauge,
            JobSpec::AuditDimension(_) => JobKind::AuditDimension,
            JobSpec::ContextSearch(_) => JobKind::ContextSearch,
            JobSpec::Analyze(_) => JobKind::Analyze,
        }
    }

    pub fn payload(&self) -> serde_json::Result<Value> {
        match self {
            JobSpec::DependencyMap(p)
            | JobSpec::DiscoverTests(p)
            | JobSpec::SecurityScan(p)
            | JobSpec::ComplexityGauge(p) => serde_json::to_value(p),
            JobSpec::AuditDimension(p) => serde_json::to_value(p),
            JobSpec::ContextSearch(p) => serde_json::to_value(p),
            JobSpec::Analyze(p) => serde_json::to_value(p),
        }
    }

    /// Rebuild the typed form of a stored job.
    pub fn from_parts(job_type: &str, payload: Value) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::json!({ "type": job_type, "payload": payload }))
    }

    pub fn into_new_job(self, priority: i32) -> serde_json::Result<NewJob> {
        Ok(NewJob::new(self.kind().as_str(), self.payload()?, priority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_names_parse_back() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("unknown_type"), None);
    }

    #[test]
    fn spec_rebuilds_from_stored_parts() {
        let spec = JobSpec::AuditDimension(DimensionPayload {
            dimension: AuditDimension::CodeQuality,
            target: None,
        });
        let payload = spec.payload().unwrap();
        assert_eq!(payload, json!({"dimension": "code_quality"}));

        let back = JobSpec::from_parts("audit_dimension", payload).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn target_payload_accepts_missing_target() {
        let spec = JobSpec::from_parts("security_scan", json!({})).unwrap();
        assert_eq!(spec, JobSpec::SecurityScan(TargetPayload { target: None }));
    }

    #[test]
    fn unknown_type_does_not_parse() {
        assert!(JobSpec::from_parts("unknown_type", json!({})).is_err());
    }

    #[test]
    fn cheap_kinds_outrank_expensive_ones() {
        assert!(
            JobKind::DependencyMap.default_priority() > JobKind::SecurityScan.default_priority()
        );
        assert!(
            JobKind::SecurityScan.default_priority() > JobKind::ComplexityGauge.default_priority()
        );
    }
}
