//! Per-table pipeline and document-level fan-out.
//!
//! Stages within one table run strictly in order:
//!
//! ```text
//! GridModel -> CandidateCollector -> consolidate -> preprocess
//!     -> validate / autofix / repair -> HeaderUnifier -> pivot
//! ```
//!
//! Tables of one document run concurrently, bounded by
//! `max_concurrent_tables`. Nothing mutable is shared between tables.

use crate::ai::{AiClient, RetryPolicy};
use crate::cache::{ClientFingerprint, PluginIdentity, ResultCache, cache_key};
use crate::collect::{CandidateCollector, TableSources};
use crate::consolidate::consolidate;
use crate::core::config::PipelineConfig;
use crate::grid::{GeometryRecord, GridModel, TableGrid};
use crate::header::HeaderUnifier;
use crate::pivot::pivot;
use crate::plugins::{CellOcrBackend, PreprocessorRegistry};
use crate::types::{DocumentResult, ProcessedTable, SkippedTable, TableOutcome, UnrepairableTable};
use crate::validation::{
    RepairContext, RepairOutcome, TableFrame, TableRepairer, TableStateMachine, TableStatus, autofix, needs_autofix,
    validate,
};
use crate::{Result, TableFuseError};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Geometry and raw payloads of one logical table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableInput {
    /// One record per panel; all share the same `canonical_id`.
    pub records: Vec<GeometryRecord>,
    #[serde(default)]
    pub sources: TableSources,
}

impl TableInput {
    pub fn new(records: Vec<GeometryRecord>) -> Self {
        Self {
            records,
            sources: TableSources::default(),
        }
    }

    pub fn with_sources(mut self, sources: TableSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn ref_id(&self) -> &str {
        self.records.first().map(|r| r.canonical_id.as_str()).unwrap_or_default()
    }

    /// Group panel records by `canonical_id` (first-seen order) and attach the
    /// payloads keyed by the same id.
    pub fn group(records: Vec<GeometryRecord>, mut sources: AHashMap<String, TableSources>) -> Vec<TableInput> {
        GridModel::group_records(records)
            .into_iter()
            .map(|(ref_id, records)| TableInput {
                records,
                sources: sources.remove(&ref_id).unwrap_or_default(),
            })
            .collect()
    }
}

/// Builder for [`TablePipeline`].
pub struct TablePipelineBuilder {
    config: PipelineConfig,
    registry: Option<PreprocessorRegistry>,
    vision: Option<Arc<dyn AiClient>>,
    repair: Option<Arc<dyn AiClient>>,
    cell_ocr: Option<Arc<dyn CellOcrBackend>>,
}

impl TablePipelineBuilder {
    /// Replace the default preprocessor registry.
    pub fn registry(mut self, registry: PreprocessorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use `client` both for vision transcription and for repair.
    pub fn ai_client(mut self, client: Arc<dyn AiClient>) -> Self {
        self.vision = Some(Arc::clone(&client));
        self.repair = Some(client);
        self
    }

    pub fn vision_client(mut self, client: Arc<dyn AiClient>) -> Self {
        self.vision = Some(client);
        self
    }

    pub fn repair_client(mut self, client: Arc<dyn AiClient>) -> Self {
        self.repair = Some(client);
        self
    }

    pub fn cell_ocr(mut self, backend: Arc<dyn CellOcrBackend>) -> Self {
        self.cell_ocr = Some(backend);
        self
    }

    /// Validate the configuration and assemble the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid settings, or a cache error when
    /// the cache directory cannot be created.
    pub fn build(self) -> Result<TablePipeline> {
        self.config.validate()?;

        let clients = ClientFingerprint {
            vision: self.vision.as_deref().map(PluginIdentity::of),
            repair: self.repair.as_deref().map(PluginIdentity::of),
            cell_ocr: self.cell_ocr.as_deref().map(PluginIdentity::of),
        };

        let retry = RetryPolicy::from(&self.config.ai);
        let mut collector = CandidateCollector::new(self.config.collection.clone(), retry);
        if let Some(client) = self.vision {
            collector = collector.with_vision(client);
        }
        if let Some(backend) = self.cell_ocr {
            collector = collector.with_cell_ocr(backend);
        }

        let repairer = self
            .repair
            .map(|client| Arc::new(TableRepairer::new(client, self.config.repair.clone(), retry)));

        let cache = self
            .config
            .cache
            .as_ref()
            .map(|cache| ResultCache::new(Some(cache.resolved_dir())))
            .transpose()?
            .map(Arc::new);

        Ok(TablePipeline {
            config: Arc::new(self.config),
            registry: Arc::new(self.registry.unwrap_or_default()),
            collector: Arc::new(collector),
            repairer,
            cache,
            clients: Arc::new(clients),
        })
    }
}

/// Runs tables through every stage. Cheap to clone.
#[derive(Clone)]
pub struct TablePipeline {
    config: Arc<PipelineConfig>,
    registry: Arc<PreprocessorRegistry>,
    collector: Arc<CandidateCollector>,
    repairer: Option<Arc<TableRepairer>>,
    cache: Option<Arc<ResultCache>>,
    clients: Arc<ClientFingerprint>,
}

impl TablePipeline {
    pub fn builder(config: PipelineConfig) -> TablePipelineBuilder {
        TablePipelineBuilder {
            config,
            registry: None,
            vision: None,
            repair: None,
            cell_ocr: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every table of a document.
    ///
    /// Results keep the input order within each list. A table whose geometry
    /// is invalid is reported as skipped; I/O errors abort the document.
    #[cfg_attr(feature = "otel", tracing::instrument(skip(self, tables), fields(document.tables = tables.len())))]
    pub async fn process_document(&self, tables: Vec<TableInput>) -> Result<DocumentResult> {
        use tokio::sync::Semaphore;
        use tokio::task::JoinSet;

        if tables.is_empty() {
            return Ok(DocumentResult::default());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent()));
        let mut tasks = JoinSet::new();

        for (index, input) in tables.into_iter().enumerate() {
            let pipeline = self.clone();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let outcome = pipeline.process_table(&input).await;
                (index, input.ref_id().to_string(), outcome)
            });
        }

        let mut outcomes: Vec<Option<TableOutcome>> = vec![None; tasks.len()];

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(outcome))) => {
                    outcomes[index] = Some(outcome);
                }
                Ok((_, _, Err(e @ TableFuseError::Io(_)))) => return Err(e),
                Ok((index, ref_id, Err(e))) => {
                    tracing::warn!("Table '{}' could not be processed: {}", ref_id, e);
                    outcomes[index] = Some(TableOutcome::Skipped(SkippedTable {
                        ref_id,
                        reason: e.to_string(),
                    }));
                }
                Err(join_err) => {
                    return Err(TableFuseError::Other(format!("Task panicked: {}", join_err)));
                }
            }
        }

        let mut result = DocumentResult::default();
        for outcome in outcomes.into_iter().flatten() {
            result.push(outcome);
        }
        tracing::info!(
            "Document done: {} processed, {} unrepairable, {} skipped",
            result.processed_tables.len(),
            result.unrepairable_tables.len(),
            result.skipped_tables.len()
        );
        Ok(result)
    }

    /// Process one table, consulting the result cache first.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the geometry is invalid.
    #[cfg_attr(feature = "otel", tracing::instrument(skip(self, input), fields(table.ref_id = %input.ref_id())))]
    pub async fn process_table(&self, input: &TableInput) -> Result<TableOutcome> {
        let key = match &self.cache {
            Some(_) => Some(cache_key(&input.records, &input.sources, &self.config, &self.clients)?),
            None => None,
        };

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            match cache.get(key) {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(e) => tracing::warn!("Ignoring unreadable cache entry for '{}': {}", input.ref_id(), e),
            }
        }

        let grid = GridModel::build_table(input.ref_id(), input.records.clone())?;
        let outcome = self.run(&grid, &input.sources).await?;

        if let (Some(cache), Some(key)) = (&self.cache, &key)
            && !matches!(outcome, TableOutcome::Skipped(_))
            && let Err(e) = cache.set(key, &outcome)
        {
            tracing::warn!("Failed to cache outcome of '{}': {}", grid.ref_id, e);
        }

        Ok(outcome)
    }

    async fn run(&self, grid: &TableGrid, sources: &TableSources) -> Result<TableOutcome> {
        let config = &self.config;
        let mut machine = TableStateMachine::new(&grid.ref_id);

        let collected = self.collector.collect(grid, sources).await;
        if collected.is_empty() {
            tracing::info!("Skipping table '{}': no source produced a candidate", grid.ref_id);
            return Ok(TableOutcome::Skipped(SkippedTable {
                ref_id: grid.ref_id.clone(),
                reason: "no source produced any candidate".to_string(),
            }));
        }

        let mut ssot = consolidate(grid, &collected.image, &collected.embedded)?;

        if config.preprocessing.enabled {
            let cells = std::mem::take(&mut ssot.cells);
            let (domain, cells) = self.registry.apply(cells, config.preprocessing.domain);
            ssot.cells = cells;
            ssot.recount();
            tracing::debug!("Table '{}' preprocessed as '{}'", grid.ref_id, domain);
        }

        let layout = grid.layout();
        let mut frame = TableFrame::from_ssot(&ssot, &layout);

        machine.transition(TableStatus::Validated)?;
        let mut result = validate(&frame, &config.validation);

        if needs_autofix(&frame) || !result.errors.is_empty() {
            machine.transition(TableStatus::AutoFixed)?;
            frame = autofix(&frame);
            machine.transition(TableStatus::Validated)?;
            result = validate(&frame, &config.validation);
            result.auto_fixed = true;
        }

        let mut repair_changes = None;
        match &self.repairer {
            Some(repairer) if config.repair.mode.should_attempt(&result) => {
                machine.transition(TableStatus::AiRepairAttempted)?;
                let context = RepairContext {
                    raw_text: collected.raw_text.as_deref(),
                    page_context: sources.page_context.as_deref(),
                };

                match repairer.repair(&frame, &result, context).await {
                    RepairOutcome::Repaired { frame: repaired, changes } => {
                        let mut revalidated = validate(&repaired, &config.validation);
                        revalidated.auto_fixed = result.auto_fixed;
                        revalidated.ai_repaired = true;
                        result = revalidated;
                        frame = repaired;
                        repair_changes = changes;
                        machine.transition(TableStatus::Polished)?;
                    }
                    RepairOutcome::Unrepairable { reason } => {
                        machine.transition(TableStatus::Unrepairable)?;
                        tracing::info!("Table '{}' declared unrepairable: {}", grid.ref_id, reason);
                        let validation = result.declared_unrepairable(reason.as_str());
                        return Ok(TableOutcome::Unrepairable(UnrepairableTable {
                            ref_id: grid.ref_id.clone(),
                            reason,
                            validation,
                        }));
                    }
                    RepairOutcome::Failed { reason } => {
                        tracing::warn!("Repair of table '{}' failed, keeping original: {}", grid.ref_id, reason);
                        machine.transition(TableStatus::Valid)?;
                    }
                }
            }
            _ => machine.transition(TableStatus::Valid)?,
        }

        let status = machine.status();
        if !status.proceeds_downstream() {
            return Err(TableFuseError::Other(format!(
                "Table '{}' reached header detection in state '{}'",
                grid.ref_id, status
            )));
        }

        let changed = frame.write_back(&mut ssot, &layout);
        if changed > 0 {
            tracing::debug!("Table '{}': {} cells updated by repair", grid.ref_id, changed);
        }

        let unifier = HeaderUnifier::new(config.header.clone());
        let mut header_map = unifier.detect(grid, &ssot);
        let enriched = unifier.enrich(grid, &ssot, &mut header_map);
        let table = pivot(&enriched, &header_map, &config.pivot);

        tracing::info!(
            "Table '{}' {} with {} pivot rows",
            grid.ref_id,
            status,
            table.row_count()
        );

        Ok(TableOutcome::Processed(Box::new(ProcessedTable {
            ref_id: grid.ref_id.clone(),
            page_index: grid.page_index,
            row_count: table.row_count(),
            col_count: table.col_count(),
            columns: table.columns,
            rows: table.rows,
            source: ssot.dominant_source(),
            is_valid: result.is_valid,
            ai_repaired: result.ai_repaired,
            validation_warnings: result.warnings,
            status,
            status_history: machine.into_history(),
            repair_changes,
            header_map,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiRequest, AiResponse};
    use crate::collect::{ImageTranscription, TranscribedCell};
    use crate::grid::CellGeometry;
    use crate::plugins::Plugin;
    use crate::types::BBox;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn records(ref_id: &str, rows: usize, cols: usize) -> Vec<GeometryRecord> {
        let mut cell_map = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                let (x0, y0) = (col as f64 * 100.0, row as f64 * 30.0);
                cell_map.push(CellGeometry {
                    row,
                    col,
                    bbox: BBox::new(x0, y0, x0 + 100.0, y0 + 30.0),
                    rowspan: None,
                    colspan: None,
                });
            }
        }
        vec![GeometryRecord {
            panel_id: "p0".to_string(),
            canonical_id: ref_id.to_string(),
            page_index: 0,
            cell_map,
        }]
    }

    fn transcription(cells: &[(usize, usize, &str)]) -> ImageTranscription {
        ImageTranscription {
            cells: cells
                .iter()
                .map(|(row, col, text)| TranscribedCell {
                    panel_id: None,
                    row: *row,
                    col: *col,
                    text: text.to_string(),
                    confidence: None,
                })
                .collect(),
            rows: None,
            raw_text: None,
        }
    }

    struct ScriptedRepair {
        answers: Mutex<Vec<String>>,
    }

    impl ScriptedRepair {
        fn new(answers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().rev().map(|a| a.to_string()).collect()),
            })
        }
    }

    impl Plugin for ScriptedRepair {
        fn name(&self) -> &str {
            "scripted-repair"
        }

        fn version(&self) -> String {
            "0.0.0".to_string()
        }
    }

    #[async_trait]
    impl AiClient for ScriptedRepair {
        async fn complete(&self, _request: &AiRequest) -> Result<AiResponse> {
            let next = self.answers.lock().unwrap().pop();
            next.map(AiResponse::new)
                .ok_or_else(|| TableFuseError::ai("no scripted answer left"))
        }
    }

    fn receipt_input(ref_id: &str) -> TableInput {
        TableInput::new(records(ref_id, 3, 2)).with_sources(TableSources {
            transcription: Some(transcription(&[
                (0, 0, "品名"),
                (0, 1, "金額"),
                (1, 0, "牛乳"),
                (1, 1, "198"),
                (2, 0, "パン"),
                (2, 1, "150"),
            ])),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_clean_table_without_repair_client() {
        let pipeline = TablePipeline::builder(PipelineConfig::default()).build().unwrap();
        let outcome = pipeline.process_table(&receipt_input("r1")).await.unwrap();

        let TableOutcome::Processed(table) = outcome else {
            panic!("expected processed table");
        };
        assert_eq!(table.columns, vec!["row_label", "金額"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].row_label, "牛乳");
        assert_eq!(table.rows[0].get("金額"), &["198".to_string()]);
        assert_eq!(table.status, TableStatus::Valid);
        assert_eq!(
            table.status_history,
            vec![TableStatus::Collected, TableStatus::Validated, TableStatus::Valid]
        );
        assert!(!table.ai_repaired);
    }

    #[tokio::test]
    async fn test_repair_polishes_table() {
        let client = ScriptedRepair::new(&[
            r#"{"headers": ["品名", "金額"], "rows": [["牛乳", "198"], ["パン", "150"]], "changes": ["none needed"]}"#,
        ]);
        let pipeline = TablePipeline::builder(PipelineConfig::default())
            .repair_client(client)
            .build()
            .unwrap();

        let TableOutcome::Processed(table) = pipeline.process_table(&receipt_input("r1")).await.unwrap() else {
            panic!("expected processed table");
        };
        assert_eq!(table.status, TableStatus::Polished);
        assert!(table.ai_repaired);
        assert_eq!(table.repair_changes.as_deref(), Some("none needed"));
    }

    #[tokio::test]
    async fn test_declared_unrepairable() {
        let client = ScriptedRepair::new(&[r#"{"is_unrepairable": true, "reason": "column count varies per row"}"#]);
        let pipeline = TablePipeline::builder(PipelineConfig::default())
            .repair_client(client)
            .build()
            .unwrap();

        let result = pipeline.process_document(vec![receipt_input("r1")]).await.unwrap();
        assert!(result.processed_tables.is_empty());
        assert_eq!(result.unrepairable_tables.len(), 1);
        let table = &result.unrepairable_tables[0];
        assert_eq!(table.reason, "column count varies per row");
        assert!(table.validation.unrepairable);
        assert!(!table.validation.is_valid);
        assert_eq!(table.validation.reason.as_deref(), Some("column count varies per row"));
    }

    #[tokio::test]
    async fn test_failed_repair_keeps_original() {
        let client = ScriptedRepair::new(&["I cannot help with that."]);
        let pipeline = TablePipeline::builder(PipelineConfig::default())
            .repair_client(client)
            .build()
            .unwrap();

        let TableOutcome::Processed(table) = pipeline.process_table(&receipt_input("r1")).await.unwrap() else {
            panic!("expected processed table");
        };
        assert_eq!(table.status, TableStatus::Valid);
        assert!(table.status_history.contains(&TableStatus::AiRepairAttempted));
        assert!(!table.ai_repaired);
        assert_eq!(table.rows[1].row_label, "パン");
    }

    #[tokio::test]
    async fn test_no_candidates_skips_table() {
        let pipeline = TablePipeline::builder(PipelineConfig::default()).build().unwrap();
        let outcome = pipeline.process_table(&TableInput::new(records("empty", 2, 2))).await.unwrap();
        assert!(matches!(outcome, TableOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_document_keeps_input_order_and_reports_bad_geometry() {
        let mut broken = records("broken", 2, 2);
        broken[0].cell_map.retain(|c| c.row != 0);
        broken[0].cell_map.iter_mut().for_each(|c| c.row = 5);

        let pipeline = TablePipeline::builder(PipelineConfig::default()).build().unwrap();
        let result = pipeline
            .process_document(vec![
                receipt_input("a"),
                TableInput::new(broken),
                receipt_input("b"),
            ])
            .await
            .unwrap();

        let ids: Vec<_> = result.processed_tables.iter().map(|t| t.ref_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(result.skipped_tables.len(), 1);
        assert_eq!(result.skipped_tables[0].ref_id, "broken");
        assert_eq!(result.total_tables(), 3);
    }

    #[test]
    fn test_group_attaches_sources_by_canonical_id() {
        let mut all = records("t2", 1, 1);
        all.extend(records("t1", 1, 1));
        let mut sources = AHashMap::new();
        sources.insert(
            "t1".to_string(),
            TableSources {
                page_context: Some("合計".to_string()),
                ..Default::default()
            },
        );

        let inputs = TableInput::group(all, sources);
        assert_eq!(inputs[0].ref_id(), "t2");
        assert!(inputs[0].sources.page_context.is_none());
        assert_eq!(inputs[1].sources.page_context.as_deref(), Some("合計"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.ai.timeout_secs = 0;
        assert!(TablePipeline::builder(config).build().is_err());
    }
}
