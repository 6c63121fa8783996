use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::jobs::kind::{
    AnalyzePayload, AuditDimension, DimensionPayload, JobSpec, QueryPayload, TargetPayload,
};
use crate::jobs::model::NewJob;
use crate::jobs::store::JobStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecomposeRequest {
    pub request: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl DecomposeRequest {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecomposeOutcome {
    pub batch_id: Uuid,
    pub job_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DecomposeError {
    #[error("decomposition request must not be empty")]
    EmptyRequest,

    #[error("failed to encode job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("failed to enqueue batch: {0}")]
    Store(#[from] anyhow::Error),
}

/// One planned job: what to run and how urgently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub spec: JobSpec,
    pub priority: i32,
}

impl PlannedJob {
    fn of(spec: JobSpec) -> Self {
        let priority = spec.kind().default_priority();
        Self { spec, priority }
    }
}

/// Turns one high-level request into a flat batch of independent jobs.
#[derive(Clone)]
pub struct Decomposer {
    store: Arc<dyn JobStore>,
    default_project: Option<String>,
}

impl Decomposer {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            default_project: None,
        }
    }

    pub fn with_default_project(mut self, project_id: Option<String>) -> Self {
        self.default_project = project_id;
        self
    }

    /// Plan and enqueue a batch. Nothing is written when the request is rejected.
    pub async fn decompose(
        &self,
        req: &DecomposeRequest,
    ) -> Result<DecomposeOutcome, DecomposeError> {
        let planned = plan(&req.request, &req.context)?;

        let project_id = req
            .context
            .get("project_id")
            .cloned()
            .or_else(|| self.default_project.clone());

        let jobs = planned
            .into_iter()
            .map(|p| {
                p.spec
                    .into_new_job(p.priority)
                    .map(|job| job.with_project(project_id.clone()))
            })
            .collect::<Result<Vec<NewJob>, _>>()?;

        let batch_id = Uuid::new_v4();
        let ids = self.store.insert_jobs(batch_id, &jobs).await?;

        tracing::info!(
            %batch_id,
            job_count = ids.len(),
            project_id = project_id.as_deref().unwrap_or("-"),
            "decomposed request"
        );

        Ok(DecomposeOutcome {
            batch_id,
            job_count: ids.len(),
        })
    }
}

/// Apply the fixed rule set. Always yields at least one job for a non-empty request.
pub fn plan(
    request: &str,
    context: &BTreeMap<String, String>,
) -> Result<Vec<PlannedJob>, DecomposeError> {
    let trimmed = request.trim();
    if trimmed.is_empty() {
        return Err(DecomposeError::EmptyRequest);
    }
    let intent = trimmed.to_lowercase();

    if intent.contains("refactor") {
        if let Some(file) = context.get("file") {
            return Ok(plan_refactor(file));
        }
    }

    if intent.contains("audit") {
        let target = context.get("file").or_else(|| context.get("path")).cloned();
        let deep = intent.contains("full") || intent.contains("deep");
        return Ok(plan_audit(target, deep));
    }

    if intent.contains("search") {
        return Ok(vec![PlannedJob::of(JobSpec::ContextSearch(QueryPayload {
            query: trimmed.to_string(),
        }))]);
    }

    Ok(vec![PlannedJob::of(JobSpec::Analyze(AnalyzePayload {
        request: trimmed.to_string(),
        context: context.clone(),
    }))])
}

fn plan_refactor(file: &str) -> Vec<PlannedJob> {
    let target = || TargetPayload {
        target: Some(file.to_string()),
    };

    vec![
        // who calls me?
        PlannedJob::of(JobSpec::DependencyMap(target())),
        PlannedJob::of(JobSpec::DiscoverTests(target())),
        PlannedJob::of(JobSpec::SecurityScan(target())),
        // baseline before the change
        PlannedJob::of(JobSpec::ComplexityGauge(target())),
    ]
}

fn plan_audit(target: Option<String>, deep: bool) -> Vec<PlannedJob> {
    let payload = TargetPayload {
        target: target.clone(),
    };

    let mut jobs = vec![
        PlannedJob::of(JobSpec::DependencyMap(payload.clone())),
        PlannedJob::of(JobSpec::SecurityScan(payload.clone())),
        PlannedJob::of(JobSpec::ComplexityGauge(payload)),
    ];

    if deep {
        jobs.extend(AuditDimension::ALL.into_iter().map(|dimension| {
            PlannedJob::of(JobSpec::AuditDimension(DimensionPayload {
                dimension,
                target: target.clone(),
            }))
        }));
    }

    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::kind::JobKind;

    fn kinds(jobs: &[PlannedJob]) -> Vec<JobKind> {
        jobs.iter().map(|j| j.spec.kind()).collect()
    }

    #[test]
    fn empty_request_is_rejected() {
        let ctx = BTreeMap::new();
        assert!(matches!(plan("", &ctx), Err(DecomposeError::EmptyRequest)));
        assert!(matches!(plan("   \n", &ctx), Err(DecomposeError::EmptyRequest)));
    }

    #[test]
    fn audit_splits_into_dimension_scans_cheapest_first() {
        let jobs = plan("Audit Project", &BTreeMap::new()).unwrap();
        assert_eq!(
            kinds(&jobs),
            vec![
                JobKind::DependencyMap,
                JobKind::SecurityScan,
                JobKind::ComplexityGauge
            ]
        );

        let prio = |k: JobKind| jobs.iter().find(|j| j.spec.kind() == k).unwrap().priority;
        assert!(prio(JobKind::DependencyMap) > prio(JobKind::ComplexityGauge));
        assert!(prio(JobKind::SecurityScan) > prio(JobKind::ComplexityGauge));
    }

    #[test]
    fn deep_audit_adds_one_job_per_dimension() {
        let jobs = plan("run a full audit", &BTreeMap::new()).unwrap();
        assert_eq!(jobs.len(), 3 + AuditDimension::ALL.len());
        let dims = jobs
            .iter()
            .filter(|j| j.spec.kind() == JobKind::AuditDimension)
            .count();
        assert_eq!(dims, 4);
    }

    #[test]
    fn audit_targets_file_from_context() {
        let mut ctx = BTreeMap::new();
        ctx.insert("path".to_string(), "src/".to_string());
        let jobs = plan("audit", &ctx).unwrap();
        for job in &jobs {
            let payload = job.spec.payload().unwrap();
            assert_eq!(payload["target"], "src/");
        }
    }

    #[test]
    fn refactor_needs_a_file() {
        let mut ctx = BTreeMap::new();
        let without = plan("refactor this", &ctx).unwrap();
        assert_eq!(kinds(&without), vec![JobKind::Analyze]);

        ctx.insert("file".to_string(), "src/lib.rs".to_string());
        let with = plan("Refactor this", &ctx).unwrap();
        assert_eq!(
            kinds(&with),
            vec![
                JobKind::DependencyMap,
                JobKind::DiscoverTests,
                JobKind::SecurityScan,
                JobKind::ComplexityGauge
            ]
        );
    }

    #[test]
    fn search_becomes_context_search() {
        let jobs = plan("search for retry logic", &BTreeMap::new()).unwrap();
        assert_eq!(
            jobs[0].spec,
            JobSpec::ContextSearch(QueryPayload {
                query: "search for retry logic".to_string()
            })
        );
    }

    #[test]
    fn unmatched_request_falls_back_to_single_analyze_job() {
        let mut ctx = BTreeMap::new();
        ctx.insert("project_id".to_string(), "p1".to_string());
        let jobs = plan("  what should we build next?  ", &ctx).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].spec,
            JobSpec::Analyze(AnalyzePayload {
                request: "what should we build next?".to_string(),
                context: ctx,
            })
        );
    }
}
