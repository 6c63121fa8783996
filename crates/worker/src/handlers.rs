use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskflow::jobs::error_codes::{ErrorCode, JobError};
use taskflow::jobs::kind::{AuditDimension, JobKind, JobSpec};
use taskflow::jobs::registry::{boxed, HandlerOptions, HandlerRegistry};

const MAX_FILES: usize = 2_000;
const MAX_MATCHES: usize = 50;
const SOURCE_EXTENSIONS: &[&str] = &["rs", "py", "ts", "tsx", "js", "jsx", "go", "java", "rb"];
const SKIP_DIRS: &[&str] = &["target", "node_modules", "dist", "build", "venv", "__pycache__"];

/// `(pattern, rule)` pairs; every rule is reported at most once per line.
const SECRET_PATTERNS: &[(&str, &str)] = &[
    (
        r"-----BEGIN (?:RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
        "private_key",
    ),
    (r"\bAKIA[0-9A-Z]{16}\b", "aws_access_key"),
    (
        r#"(?i)\b(?:password|passwd|pwd)\b["']?\s*(?::\s*[^"'=\n]*)?[:=]\s*["'][^"']+"#,
        "hardcoded_password",
    ),
    (
        r#"(?i)\bapi[_-]?key\b["']?\s*(?::\s*[^"'=\n]*)?[:=]\s*["'][^"']+"#,
        "hardcoded_api_key",
    ),
    (
        r#"(?i)\b(?:client_)?secret(?:_key)?\b["']?\s*(?::\s*[^"'=\n]*)?[:=]\s*["'][^"']+"#,
        "hardcoded_secret",
    ),
];

/// First capture group is the imported module. Tried in order, first match wins.
const IMPORT_PATTERNS: &[&str] = &[
    // rust
    r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(?:::)?(\w+)",
    r"^\s*extern\s+crate\s+(\w+)",
    // js / ts
    r#"^\s*import\s+.*?\bfrom\s+['"]([^'"]+)['"]"#,
    r#"^\s*import\s+['"]([^'"]+)['"]"#,
    // python / java
    r"^\s*import\s+(\w+)",
    r"^\s*from\s+(\w+)\s+import\b",
];

/// Where relative job targets are resolved.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    pub root: PathBuf,
}

struct Rules {
    secrets: Vec<(Regex, &'static str)>,
    imports: Vec<Regex>,
}

impl Rules {
    fn compile() -> Result<Self, regex::Error> {
        let secrets = SECRET_PATTERNS
            .iter()
            .map(|(pattern, rule)| Regex::new(pattern).map(|re| (re, *rule)))
            .collect::<Result<Vec<_>, _>>()?;
        let imports = IMPORT_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { secrets, imports })
    }
}

/// State shared by every built-in handler.
struct Scanner {
    ctx: HandlerContext,
    rules: Rules,
}

/// Set when the handler future is dropped, e.g. by the per-type timeout.
/// The blocking walk polls it so a timed-out scan stops instead of running on.
#[derive(Clone, Debug, Default)]
struct Cancel(Arc<AtomicBool>);

impl Cancel {
    fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), JobError> {
        if self.is_set() {
            return Err(JobError::new(ErrorCode::Timeout, "scan cancelled"));
        }
        Ok(())
    }
}

struct CancelOnDrop(Cancel);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0 .0.store(true, Ordering::Relaxed);
    }
}

/// Register one handler per built-in job kind. Fails only if a rule pattern does not compile.
pub fn build_registry(
    ctx: HandlerContext,
    timeout: Option<Duration>,
) -> anyhow::Result<Arc<HandlerRegistry>> {
    let mut registry = HandlerRegistry::new();
    let scanner = Arc::new(Scanner {
        ctx,
        rules: Rules::compile()?,
    });

    for kind in JobKind::ALL {
        let mut opts = HandlerOptions::new();
        if let Some(dur) = timeout {
            opts = opts.timeout(dur);
        }

        let scanner = scanner.clone();
        registry.register_with_options(
            kind.as_str(),
            move |payload| {
                let scanner = scanner.clone();
                boxed(async move {
                    let spec = JobSpec::from_parts(kind.as_str(), payload)
                        .map_err(JobError::bad_payload)?;

                    let cancel = Cancel::default();
                    let _guard = CancelOnDrop(cancel.clone());
                    // file walking is blocking work
                    tokio::task::spawn_blocking(move || run_spec(&scanner, spec, &cancel))
                        .await
                        .map_err(|e| JobError::new(ErrorCode::Panic, e.to_string()))?
                })
            },
            opts,
        );
    }

    Ok(Arc::new(registry))
}

fn run_spec(scanner: &Scanner, spec: JobSpec, cancel: &Cancel) -> Result<Value, JobError> {
    let rules = &scanner.rules;
    let files = |target: Option<&str>| source_files(&scanner.ctx, target, cancel);

    match spec {
        JobSpec::DependencyMap(p) => to_json(dependency_map(rules, &files(p.target.as_deref())?)),
        JobSpec::DiscoverTests(p) => {
            let target = p
                .target
                .ok_or_else(|| JobError::bad_payload("discover_tests needs a target"))?;
            to_json(discover_tests(&files(None)?, &target))
        }
        JobSpec::SecurityScan(p) => to_json(security_scan(rules, &files(p.target.as_deref())?)),
        JobSpec::ComplexityGauge(p) => to_json(complexity_gauge(&files(p.target.as_deref())?)),
        JobSpec::AuditDimension(p) => {
            let files = files(p.target.as_deref())?;
            let findings = match p.dimension {
                AuditDimension::Security => to_json(security_scan(rules, &files))?,
                AuditDimension::Performance => to_json(hot_loops(&files))?,
                AuditDimension::CodeQuality => to_json(complexity_gauge(&files))?,
                AuditDimension::Architecture => to_json(dependency_map(rules, &files))?,
            };
            Ok(json!({ "dimension": p.dimension, "findings": findings }))
        }
        JobSpec::ContextSearch(p) => to_json(context_search(&files(None)?, &p.query)),
        // free-form requests are answered by the synthesizer; hand the inputs through
        JobSpec::Analyze(p) => Ok(json!({
            "request": p.request,
            "context": p.context,
            "files_in_scope": files(None)?.len(),
        })),
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, JobError> {
    serde_json::to_value(value).map_err(|e| JobError::failed(e.to_string()))
}

struct SourceFile {
    path: PathBuf,
    text: String,
}

/// Resolve a job target against the project root. Targets must stay inside the root:
/// absolute paths, `..` segments and symlinks leading out are `BAD_PAYLOAD`.
fn resolve_target(root: &Path, target: Option<&str>) -> Result<PathBuf, JobError> {
    let Some(t) = target else {
        return Ok(root.to_path_buf());
    };

    let relative = Path::new(t);
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(JobError::bad_payload(format!(
            "target {t} must be a relative path inside the project"
        )));
    }

    let start = root.join(relative);
    if !start.exists() {
        return Err(JobError::bad_payload(format!(
            "target {} does not exist",
            start.display()
        )));
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|e| JobError::bad_payload(format!("project root unreadable: {e}")))?;
    let canonical = start
        .canonicalize()
        .map_err(|e| JobError::bad_payload(format!("target {t} unreadable: {e}")))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(JobError::bad_payload(format!(
            "target {t} resolves outside the project"
        )));
    }

    Ok(start)
}

fn source_files(
    ctx: &HandlerContext,
    target: Option<&str>,
    cancel: &Cancel,
) -> Result<Vec<SourceFile>, JobError> {
    let start = resolve_target(&ctx.root, target)?;

    let mut paths = Vec::new();
    collect_paths(&start, &mut paths, cancel);
    cancel.check()?;
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        cancel.check()?;
        // binary or unreadable files are skipped
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let path = path.strip_prefix(&ctx.root).unwrap_or(&path).to_path_buf();
        files.push(SourceFile { path, text });
    }
    Ok(files)
}

fn collect_paths(path: &Path, out: &mut Vec<PathBuf>, cancel: &Cancel) {
    if out.len() >= MAX_FILES || cancel.is_set() {
        return;
    }
    if path.is_file() {
        out.push(path.to_path_buf());
        return;
    }
    let Ok(entries) = std::fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        let p = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if p.is_dir() {
            if !SKIP_DIRS.contains(&name.as_str()) {
                collect_paths(&p, out, cancel);
            }
        } else if p
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
        {
            out.push(p);
        }
        if out.len() >= MAX_FILES || cancel.is_set() {
            return;
        }
    }
}

#[derive(Debug, Serialize)]
struct DependencyMap {
    files: usize,
    imports: BTreeSet<String>,
}

fn dependency_map(rules: &Rules, files: &[SourceFile]) -> DependencyMap {
    let mut imports = BTreeSet::new();
    for file in files {
        for line in file.text.lines() {
            let module = rules
                .imports
                .iter()
                .find_map(|re| re.captures(line))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str());

            // relative js imports and rust path keywords are not dependencies
            if let Some(m) = module {
                if !m.starts_with('.') && !matches!(m, "crate" | "self" | "super") {
                    imports.insert(m.to_string());
                }
            }
        }
    }
    DependencyMap {
        files: files.len(),
        imports,
    }
}

#[derive(Debug, Serialize)]
struct DiscoveredTests {
    target: String,
    tests: Vec<String>,
}

fn discover_tests(files: &[SourceFile], target: &str) -> DiscoveredTests {
    let stem = Path::new(target)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(target)
        .to_string();

    let tests = files
        .iter()
        .filter(|f| {
            let p = f.path.to_string_lossy();
            let is_test_file = p.contains("test") || f.text.contains("#[cfg(test)]");
            is_test_file && (p.contains(&stem) || f.text.contains(&stem))
        })
        .map(|f| f.path.display().to_string())
        .collect();

    DiscoveredTests {
        target: target.to_string(),
        tests,
    }
}

#[derive(Debug, Serialize)]
struct SecurityIssue {
    file: String,
    line: usize,
    rule: &'static str,
}

#[derive(Debug, Serialize)]
struct SecurityReport {
    status: &'static str,
    scanned: usize,
    issues: Vec<SecurityIssue>,
}

fn security_scan(rules: &Rules, files: &[SourceFile]) -> SecurityReport {
    let mut issues = Vec::new();
    for file in files {
        for (n, line) in file.text.lines().enumerate() {
            for (re, rule) in &rules.secrets {
                if re.is_match(line) {
                    issues.push(SecurityIssue {
                        file: file.path.display().to_string(),
                        line: n + 1,
                        rule: *rule,
                    });
                }
            }
        }
    }

    SecurityReport {
        status: if issues.is_empty() { "safe" } else { "issues_found" },
        scanned: files.len(),
        issues,
    }
}

#[derive(Debug, Serialize)]
struct Complexity {
    files: usize,
    branches: usize,
    score: f64,
    verdict: &'static str,
}

fn complexity_gauge(files: &[SourceFile]) -> Complexity {
    let branches: usize = files
        .iter()
        .flat_map(|f| f.text.lines())
        .map(|line| {
            line.split(|c: char| !c.is_alphanumeric() && c != '_')
                .filter(|w| matches!(*w, "if" | "elif" | "for" | "while" | "match" | "case" | "loop"))
                .count()
                + line.matches("&&").count()
                + line.matches("||").count()
        })
        .sum();

    let score = if files.is_empty() {
        0.0
    } else {
        branches as f64 / files.len() as f64
    };
    let verdict = match score {
        s if s < 10.0 => "clean",
        s if s < 25.0 => "moderate",
        _ => "complex",
    };

    Complexity {
        files: files.len(),
        branches,
        score,
        verdict,
    }
}

#[derive(Debug, Serialize)]
struct HotLoops {
    files: usize,
    loops: usize,
    nested_loops: usize,
}

fn hot_loops(files: &[SourceFile]) -> HotLoops {
    let mut loops = 0;
    let mut nested_loops = 0;
    for file in files {
        let mut open_loop_indents: Vec<usize> = Vec::new();
        for line in file.text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let indent = line.len() - line.trim_start().len();
            open_loop_indents.retain(|&i| i < indent);

            let trimmed = line.trim_start();
            if ["for ", "while ", "loop "].iter().any(|k| trimmed.starts_with(k)) {
                loops += 1;
                if !open_loop_indents.is_empty() {
                    nested_loops += 1;
                }
                open_loop_indents.push(indent);
            }
        }
    }
    HotLoops {
        files: files.len(),
        loops,
        nested_loops,
    }
}

#[derive(Debug, Serialize)]
struct SearchHit {
    file: String,
    line: usize,
    text: String,
}

#[derive(Debug, Serialize)]
struct SearchResults {
    query: String,
    terms: Vec<String>,
    hits: Vec<SearchHit>,
    truncated: bool,
}

fn context_search(files: &[SourceFile], query: &str) -> SearchResults {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_').to_lowercase())
        .filter(|w| w.len() >= 4 && !matches!(w.as_str(), "search" | "where" | "find" | "with" | "that"))
        .collect();

    let mut hits = Vec::new();
    let mut truncated = false;
    'files: for file in files {
        for (n, line) in file.text.lines().enumerate() {
            let lower = line.to_lowercase();
            if terms.iter().any(|t| lower.contains(t.as_str())) {
                if hits.len() == MAX_MATCHES {
                    truncated = true;
                    break 'files;
                }
                hits.push(SearchHit {
                    file: file.path.display().to_string(),
                    line: n + 1,
                    text: line.trim().to_string(),
                });
            }
        }
    }

    SearchResults {
        query: query.to_string(),
        terms,
        hits,
        truncated,
    }
}
