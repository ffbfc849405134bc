//! Detective — distills failure evidence out of the sanitized logs.
//!
//! Multi-format extraction: Python tracebacks, JS stack frames, Rust
//! panics, and generic `error:` lines. The report feeds the reasoner, so
//! finding *which files* are implicated matters more than perfect parsing.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use lifecycle::{AnalysisReport, Stage, StageContext, StageFailure, StageKind, StageOutput};

struct LogPatterns {
    exception: Regex,
    python_frame: Regex,
    js_frame: Regex,
    rust_panic: Regex,
    file_ref: Regex,
    error_line: Regex,
}

fn patterns() -> &'static LogPatterns {
    static PATTERNS: OnceLock<LogPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| LogPatterns {
        exception: Regex::new(r"(?m)^\s*(\w+(?:Error|Exception|Warning)):\s*(.+)$")
            .expect("invalid exception pattern"),
        python_frame: Regex::new(r#"(?m)^\s*File "([^"]+)", line (\d+)"#)
            .expect("invalid python frame pattern"),
        js_frame: Regex::new(r"(?m)^\s+at (?:.+? \()?([\w./\\-]+):(\d+):\d+\)?$")
            .expect("invalid js frame pattern"),
        rust_panic: Regex::new(r"(?m)panicked at '?(.*?)'?,?\s+([\w./\\-]+\.rs):(\d+)")
            .expect("invalid rust panic pattern"),
        file_ref: Regex::new(r"(?m)([\w./\\-]+\.(?:py|rs|js|ts|go|java|rb)):(\d+)")
            .expect("invalid file ref pattern"),
        error_line: Regex::new(r"(?im)^.*\b(?:error|failed|fatal|panic)\b.*$")
            .expect("invalid error line pattern"),
    })
}

#[derive(Default)]
pub struct DetectiveAgent;

impl DetectiveAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for DetectiveAgent {
    fn kind(&self) -> StageKind {
        StageKind::Analyze
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageFailure> {
        let Some(logs) = ctx.effective_logs() else {
            return Err(StageFailure::semantic(
                "no logs to analyze; nothing actionable in this incident",
            ));
        };

        let p = patterns();

        let mut exception_types: Vec<String> = Vec::new();
        let mut primary_error: Option<String> = None;
        for caps in p.exception.captures_iter(logs) {
            let name = caps[1].to_string();
            if primary_error.is_none() {
                primary_error = Some(format!("{}: {}", &caps[1], caps[2].trim()));
            }
            if !exception_types.contains(&name) {
                exception_types.push(name);
            }
        }
        if let Some(caps) = p.rust_panic.captures(logs) {
            if primary_error.is_none() {
                primary_error = Some(format!("panicked at '{}'", &caps[1]));
            }
            let name = "panic".to_string();
            if !exception_types.contains(&name) {
                exception_types.push(name);
            }
        }

        let mut suspect_files: Vec<String> = Vec::new();
        for regex in [&p.python_frame, &p.js_frame, &p.file_ref] {
            for caps in regex.captures_iter(logs) {
                let file = caps[1].to_string();
                if !suspect_files.contains(&file) {
                    suspect_files.push(file);
                }
            }
        }

        let error_lines: Vec<String> = p
            .error_line
            .find_iter(logs)
            .map(|m| m.as_str().trim().to_string())
            .take(20)
            .collect();

        let primary_error = match primary_error.or_else(|| error_lines.first().cloned()) {
            Some(e) => e,
            None => {
                return Err(StageFailure::semantic(
                    "no error signal found in the provided logs",
                ))
            }
        };

        tracing::info!(
            incident_id = %ctx.incident_id,
            exceptions = exception_types.len(),
            suspects = suspect_files.len(),
            "analysis complete"
        );

        Ok(StageOutput::Analyzed(AnalysisReport {
            primary_error,
            error_lines,
            exception_types,
            suspect_files,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle::RepositoryInfo;
    use uuid::Uuid;

    fn ctx(logs: &str) -> StageContext {
        StageContext::new(
            Uuid::new_v4(),
            RepositoryInfo::new("https://github.com/acme/payments"),
            Some(logs.to_string()),
        )
    }

    fn analysis(output: StageOutput) -> AnalysisReport {
        match output {
            StageOutput::Analyzed(r) => r,
            other => panic!("expected analysis report, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parses_python_traceback() {
        let logs = "Traceback (most recent call last):\n  \
                    File \"src/checkout.py\", line 12, in charge\n    \
                    total = cart.total\n\
                    AttributeError: 'NoneType' object has no attribute 'total'";
        let report = analysis(DetectiveAgent::new().execute(&ctx(logs)).await.unwrap());

        assert_eq!(
            report.primary_error,
            "AttributeError: 'NoneType' object has no attribute 'total'"
        );
        assert_eq!(report.exception_types, vec!["AttributeError"]);
        assert_eq!(report.suspect_files, vec!["src/checkout.py"]);
    }

    #[tokio::test]
    async fn parses_rust_panic() {
        let logs = "thread 'main' panicked at 'index out of bounds', src/parser.rs:88:9";
        let report = analysis(DetectiveAgent::new().execute(&ctx(logs)).await.unwrap());

        assert!(report.primary_error.contains("index out of bounds"));
        assert!(report.suspect_files.contains(&"src/parser.rs".to_string()));
    }

    #[tokio::test]
    async fn generic_error_lines_are_enough() {
        let logs = "2024-05-01 12:00:00 ERROR payment gateway returned 502\nall done";
        let report = analysis(DetectiveAgent::new().execute(&ctx(logs)).await.unwrap());

        assert!(report.primary_error.contains("502"));
        assert!(report.suspect_files.is_empty());
    }

    #[tokio::test]
    async fn quiet_logs_are_a_semantic_failure() {
        let logs = "deploy finished\nall checks green";
        let failure = DetectiveAgent::new().execute(&ctx(logs)).await.unwrap_err();
        assert_eq!(failure.kind, lifecycle::FailureKind::Semantic);
    }

    #[tokio::test]
    async fn missing_logs_are_a_semantic_failure() {
        let mut context = ctx("");
        context.logs = None;
        let failure = DetectiveAgent::new().execute(&context).await.unwrap_err();
        assert!(failure.reason.contains("no logs"));
    }
}
