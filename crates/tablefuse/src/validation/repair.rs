//! Tier 3: AI-assisted repair.
//!
//! The model sees a bounded rendering of the table (first
//! `max_prompt_rows` data rows), the outstanding findings, and optional raw
//! transcription / page context. It must answer with either a corrected
//! `{headers, rows, changes?}` payload or `{is_unrepairable: true, reason}`.
//!
//! Only an explicit refusal makes a table unrepairable. Transport failures,
//! undecodable answers and answers that change the table shape are repair
//! failures: the caller keeps the previous result.

use crate::ai::decode::{lenient_cells, lenient_rows, value_to_text};
use crate::ai::{AiClient, AiRequest, RetryPolicy, call_with_retry, decode_as};
use crate::core::config::RepairConfig;
use crate::validation::{TableFrame, ValidationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;

/// When Tier 3 runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairMode {
    /// Every table reaching Tier 3, clean or not.
    #[default]
    Always,
    /// Only tables with outstanding warnings or errors.
    OnFindings,
    Never,
}

impl RepairMode {
    pub fn should_attempt(&self, result: &ValidationResult) -> bool {
        match self {
            RepairMode::Always => true,
            RepairMode::OnFindings => result.has_findings(),
            RepairMode::Never => false,
        }
    }
}

/// Extra evidence for the repair prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepairContext<'a> {
    pub raw_text: Option<&'a str>,
    pub page_context: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    /// Shape-preserving correction. `frame` covers the whole table.
    Repaired { frame: TableFrame, changes: Option<String> },
    /// The model declared the table impossible to fix.
    Unrepairable { reason: String },
    /// No usable answer; keep the previous result.
    Failed { reason: String },
}

#[derive(Debug, Deserialize)]
struct RepairResponse {
    #[serde(default)]
    is_unrepairable: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default, deserialize_with = "lenient_cells")]
    headers: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_rows")]
    rows: Option<Vec<Vec<String>>>,
    #[serde(default)]
    changes: Option<Value>,
}

/// `changes` may come back as a string or a list of strings.
fn describe_changes(changes: Option<Value>) -> Option<String> {
    let text = match changes? {
        Value::Array(items) => items.iter().map(value_to_text).collect::<Vec<_>>().join("; "),
        other => value_to_text(&other),
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Build the bounded repair prompt.
pub fn build_repair_prompt(
    frame: &TableFrame,
    result: &ValidationResult,
    context: RepairContext<'_>,
    config: &RepairConfig,
) -> String {
    let shown = frame.rows.len().min(config.max_prompt_rows);
    let width = frame.headers.len();
    let mut prompt = String::new();

    prompt.push_str("You are repairing a table that was read from a photographed document.\n\nRules:\n");
    prompt.push_str(
        "1. Move tokens that landed in the wrong row or column to the correct cell, using the surrounding context.\n",
    );
    prompt.push_str(
        "2. Merge fragments of one logical value that were split apart, for example a currency symbol separated from its number.\n",
    );
    let _ = writeln!(
        prompt,
        "3. Never add or remove rows or columns: return exactly {} headers and exactly {} rows of {} cells.",
        width, shown, width
    );
    prompt.push_str("4. Leave a cell empty when it is legitimately empty. Never invent content.\n\n");
    prompt.push_str(
        "If the table cannot be repaired under these rules, respond with {\"is_unrepairable\": true, \"reason\": \"<why>\"}.\n\
         Otherwise respond with {\"headers\": [...], \"rows\": [[...]], \"changes\": \"<what you changed>\"}.\n\
         Respond with a single JSON object and nothing else.\n\n",
    );

    if result.has_findings() {
        prompt.push_str("Findings:\n");
        for error in &result.errors {
            let _ = writeln!(prompt, "- error: {}", error);
        }
        for warning in &result.warnings {
            let _ = writeln!(prompt, "- warning: {}", warning);
        }
        prompt.push('\n');
    }

    let headers = serde_json::to_string(&frame.headers).unwrap_or_default();
    let rows = serde_json::to_string(&frame.rows[..shown]).unwrap_or_default();
    let _ = writeln!(prompt, "Table:\n{{\"headers\": {}, \"rows\": {}}}", headers, rows);
    if shown < frame.rows.len() {
        let _ = writeln!(prompt, "({} further rows are not shown and stay unchanged.)", frame.rows.len() - shown);
    }

    if let Some(raw) = context.raw_text.filter(|t| !t.trim().is_empty()) {
        let _ = write!(
            prompt,
            "\nRaw transcription of the table:\n{}\n",
            truncate_chars(raw, config.max_context_chars)
        );
    }
    if let Some(page) = context.page_context.filter(|t| !t.trim().is_empty()) {
        let _ = write!(
            prompt,
            "\nText near the table on the page:\n{}\n",
            truncate_chars(page, config.max_context_chars)
        );
    }

    prompt
}

/// Interpret a model answer against the frame that was sent.
pub fn interpret_repair_response(frame: &TableFrame, text: &str, max_prompt_rows: usize) -> RepairOutcome {
    let response: RepairResponse = match decode_as(text) {
        Ok(response) => response,
        Err(e) => {
            return RepairOutcome::Failed {
                reason: format!("undecodable repair response: {}", e),
            };
        }
    };

    if response.is_unrepairable {
        let reason = response
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "declared unrepairable without a reason".to_string());
        return RepairOutcome::Unrepairable { reason };
    }

    let Some(rows) = response.rows else {
        return RepairOutcome::Failed {
            reason: "repair response has no rows".to_string(),
        };
    };
    let headers = response.headers.unwrap_or_else(|| frame.headers.clone());
    let width = frame.headers.len();
    let shown = frame.rows.len().min(max_prompt_rows);

    if headers.len() != width {
        return RepairOutcome::Failed {
            reason: format!("repair changed the column count from {} to {}", width, headers.len()),
        };
    }
    if rows.len() != shown {
        return RepairOutcome::Failed {
            reason: format!("repair changed the row count from {} to {}", shown, rows.len()),
        };
    }
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != width) {
        return RepairOutcome::Failed {
            reason: format!("repaired row {} has {} cells, expected {}", idx, row.len(), width),
        };
    }

    let mut repaired_rows = rows;
    repaired_rows.extend(frame.rows[shown..].iter().cloned());

    RepairOutcome::Repaired {
        frame: TableFrame {
            headers,
            rows: repaired_rows,
            row_count: frame.row_count,
            col_count: frame.col_count,
        },
        changes: describe_changes(response.changes),
    }
}

/// Runs Tier 3 against an injected [`AiClient`].
pub struct TableRepairer {
    client: Arc<dyn AiClient>,
    config: RepairConfig,
    retry: RetryPolicy,
}

impl TableRepairer {
    pub fn new(client: Arc<dyn AiClient>, config: RepairConfig, retry: RetryPolicy) -> Self {
        Self { client, config, retry }
    }

    #[cfg_attr(feature = "otel", tracing::instrument(skip(self, frame, result, context)))]
    pub async fn repair(&self, frame: &TableFrame, result: &ValidationResult, context: RepairContext<'_>) -> RepairOutcome {
        let prompt = build_repair_prompt(frame, result, context, &self.config);
        let request = AiRequest::new(prompt).with_max_output_tokens(self.config.max_output_tokens);

        match call_with_retry(self.client.as_ref(), &request, &self.retry).await {
            Ok(response) => interpret_repair_response(frame, &response.text, self.config.max_prompt_rows),
            Err(e) => RepairOutcome::Failed {
                reason: format!("repair call failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiResponse;
    use crate::plugins::Plugin;
    use crate::{Result, TableFuseError};
    use async_trait::async_trait;
    use std::time::Duration;

    fn s(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn receipt() -> TableFrame {
        TableFrame::new(s(&["品名", "金額"]), vec![s(&["牛乳 ¥", "198"]), s(&["パン", "150"])])
    }

    #[test]
    fn test_repair_mode_gating() {
        let clean = ValidationResult {
            is_valid: true,
            ..Default::default()
        };
        let noisy = ValidationResult {
            is_valid: true,
            warnings: vec!["Row 1 is empty".to_string()],
            ..Default::default()
        };
        assert!(RepairMode::Always.should_attempt(&clean));
        assert!(!RepairMode::OnFindings.should_attempt(&clean));
        assert!(RepairMode::OnFindings.should_attempt(&noisy));
        assert!(!RepairMode::Never.should_attempt(&noisy));
    }

    #[test]
    fn test_prompt_is_bounded_and_carries_context() {
        let rows: Vec<Vec<String>> = (0..30).map(|i| vec![format!("r{}", i)]).collect();
        let frame = TableFrame::new(s(&["x"]), rows);
        let result = ValidationResult {
            is_valid: true,
            warnings: vec!["Column 'x' looks odd".to_string()],
            ..Default::default()
        };
        let config = RepairConfig {
            max_context_chars: 5,
            ..Default::default()
        };
        let context = RepairContext {
            raw_text: Some("raw transcription text"),
            page_context: Some("領収書 2024年"),
        };

        let prompt = build_repair_prompt(&frame, &result, context, &config);
        assert!(prompt.contains("\"r19\""));
        assert!(!prompt.contains("\"r20\""));
        assert!(prompt.contains("10 further rows are not shown"));
        assert!(prompt.contains("- warning: Column 'x' looks odd"));
        assert!(prompt.contains("raw t\n"));
        assert!(prompt.contains("領収書 2\n"));
        assert!(prompt.contains("is_unrepairable"));
        assert!(prompt.contains("exactly 1 headers and exactly 20 rows"));
    }

    #[test]
    fn test_refusal_is_unrepairable() {
        let outcome = interpret_repair_response(
            &receipt(),
            r#"{"is_unrepairable": true, "reason": "column count varies per row"}"#,
            20,
        );
        assert_eq!(
            outcome,
            RepairOutcome::Unrepairable {
                reason: "column count varies per row".to_string()
            }
        );
    }

    #[test]
    fn test_repair_keeps_changes_and_hidden_rows() {
        let rows: Vec<Vec<String>> = (0..3).map(|i| vec![format!("r{}", i)]).collect();
        let frame = TableFrame::new(s(&["x"]), rows);
        let outcome = interpret_repair_response(
            &frame,
            "```json\n{\"headers\": [\"x\"], \"rows\": [[\"R0\"], [\"R1\"]], \"changes\": [\"upper-cased r0\", \"upper-cased r1\"]}\n```",
            2,
        );
        match outcome {
            RepairOutcome::Repaired { frame, changes } => {
                assert_eq!(frame.rows, vec![s(&["R0"]), s(&["R1"]), s(&["r2"])]);
                assert_eq!(changes.as_deref(), Some("upper-cased r0; upper-cased r1"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_shape_changes_are_failures() {
        let added_row = r#"{"headers": ["品名", "金額"], "rows": [["牛乳", "¥198"], ["パン", "150"], ["new", "1"]]}"#;
        assert!(matches!(
            interpret_repair_response(&receipt(), added_row, 20),
            RepairOutcome::Failed { .. }
        ));

        let dropped_column = r#"{"headers": ["品名"], "rows": [["牛乳"], ["パン"]]}"#;
        assert!(matches!(
            interpret_repair_response(&receipt(), dropped_column, 20),
            RepairOutcome::Failed { .. }
        ));

        let ragged = r#"{"rows": [["牛乳", "¥198", "x"], ["パン", "150"]]}"#;
        assert!(matches!(
            interpret_repair_response(&receipt(), ragged, 20),
            RepairOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_garbage_is_failure_not_unrepairable() {
        assert!(matches!(
            interpret_repair_response(&receipt(), "Sorry, I can't read that.", 20),
            RepairOutcome::Failed { .. }
        ));
        assert!(matches!(
            interpret_repair_response(&receipt(), r#"{"note": "nothing"}"#, 20),
            RepairOutcome::Failed { .. }
        ));
    }

    struct OfflineClient;

    impl Plugin for OfflineClient {
        fn name(&self) -> &str {
            "offline"
        }

        fn version(&self) -> String {
            "0.0.1".to_string()
        }
    }

    #[async_trait]
    impl AiClient for OfflineClient {
        async fn complete(&self, _request: &AiRequest) -> Result<AiResponse> {
            Err(TableFuseError::network("no route to host"))
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_repair_failure() {
        let repairer = TableRepairer::new(
            Arc::new(OfflineClient),
            RepairConfig::default(),
            RetryPolicy {
                timeout: Duration::from_secs(1),
                max_retries: 1,
                backoff: Duration::from_millis(1),
            },
        );
        let outcome = repairer
            .repair(&receipt(), &ValidationResult::default(), RepairContext::default())
            .await;
        assert!(matches!(outcome, RepairOutcome::Failed { reason } if reason.contains("no route to host")));
    }
}
