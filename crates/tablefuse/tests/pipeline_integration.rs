//! End-to-end pipeline tests.
//!
//! Covers:
//! - source priority during consolidation
//! - multi-panel header unification and pivoting
//! - the repair tiers (polish, declared unrepairable, transient failure)
//! - vision transcription, repair gating and the result cache

use std::sync::Arc;
use tablefuse::collect::{collect_embedded, transcription_candidates};
use tablefuse::consolidate::consolidate;
use tablefuse::validation::{RepairMode, TableStatus};
use tablefuse::{
    BBox, CacheConfig, CellRef, CellSource, EmbeddedWord, GridModel, PipelineConfig, TableInput, TableOutcome,
    TablePipeline, TableSource, TableSources,
};

mod helpers;

use helpers::{ScriptedClient, UnreachableClient, init_tracing, panel_record, transcription, transcription_rows};

fn receipt_input(ref_id: &str) -> TableInput {
    TableInput::new(vec![panel_record(ref_id, "p0", 0.0, 3, 2)]).with_sources(TableSources {
        transcription: Some(transcription_rows(
            "p0",
            &[&["品名", "金額"], &["牛乳", "198"], &["パン", "150"]],
        )),
        ..Default::default()
    })
}

fn processed(outcome: TableOutcome) -> Box<tablefuse::ProcessedTable> {
    match outcome {
        TableOutcome::Processed(table) => table,
        other => panic!("expected a processed table, got {:?}", other),
    }
}

#[test]
fn test_image_candidates_win_over_embedded_text() {
    let grid = GridModel::build_table("t", vec![panel_record("t", "p0", 0.0, 2, 2)]).unwrap();
    let image = transcription_candidates(&grid, &transcription(&[("p0", 0, 0, "A"), ("p0", 0, 1, "B")]));
    let words = vec![
        EmbeddedWord::new("X", BBox::new(10.0, 5.0, 40.0, 25.0)),
        EmbeddedWord::new("C", BBox::new(10.0, 35.0, 40.0, 55.0)),
        EmbeddedWord::new("D", BBox::new(110.0, 35.0, 140.0, 55.0)),
    ];
    let embedded = collect_embedded(&grid, &words, 0.0);

    let ssot = consolidate(&grid, &image, &embedded).unwrap();
    let expected = [
        ((0, 0), "A", CellSource::Image),
        ((0, 1), "B", CellSource::Image),
        ((1, 0), "C", CellSource::Embedded),
        ((1, 1), "D", CellSource::Embedded),
    ];
    for ((row, col), text, source) in expected {
        let cell = ssot.get(&CellRef::new("p0", row, col)).unwrap();
        assert_eq!(cell.text, text, "text of ({}, {})", row, col);
        assert_eq!(cell.source, source, "source of ({}, {})", row, col);
    }
    assert_eq!(ssot.dominant_source(), TableSource::Mixed);
}

#[test]
fn test_embedded_only_table_marks_missing_cells_none() {
    let grid = GridModel::build_table("t", vec![panel_record("t", "p0", 0.0, 2, 2)]).unwrap();
    let words = vec![
        EmbeddedWord::new("合計", BBox::new(5.0, 5.0, 50.0, 25.0)),
        EmbeddedWord::new("1,200", BBox::new(105.0, 35.0, 160.0, 55.0)),
    ];
    let embedded = collect_embedded(&grid, &words, 0.0);

    let ssot = consolidate(&grid, &[], &embedded).unwrap();
    for cell in &ssot.cells {
        if cell.is_empty() {
            assert_eq!(cell.source, CellSource::None, "{}", cell.cell);
        } else {
            assert_eq!(cell.source, CellSource::Embedded, "{}", cell.cell);
        }
    }
    assert_eq!(ssot.stats.filled_cells, 2);
    assert_eq!(ssot.dominant_source(), TableSource::Embedded);
}

#[tokio::test]
async fn test_two_panel_timetable_is_unified_and_pivoted() {
    init_tracing();
    let input = TableInput::new(vec![
        panel_record("timetable", "days", 200.0, 3, 2),
        panel_record("timetable", "periods", 0.0, 3, 1),
    ])
    .with_sources(TableSources {
        transcription: Some(transcription(&[
            ("periods", 1, 0, "1限"),
            ("periods", 2, 0, "2限"),
            ("days", 0, 0, "月"),
            ("days", 0, 1, "火"),
            ("days", 1, 0, "国語"),
            ("days", 1, 1, "算数"),
            ("days", 2, 0, "理科"),
            ("days", 2, 1, "体育"),
        ])),
        ..Default::default()
    });

    let pipeline = TablePipeline::builder(PipelineConfig::default()).build().unwrap();
    let table = processed(pipeline.process_table(&input).await.unwrap());

    assert_eq!(table.header_map.global_col("periods", 0), Some(0));
    assert_eq!(table.header_map.global_col("days", 0), Some(1));
    assert_eq!(table.columns, vec!["row_label", "月", "火"]);

    let labels: Vec<_> = table.rows.iter().map(|r| r.row_label.as_str()).collect();
    assert_eq!(labels, vec!["1限", "2限"]);
    assert_eq!(table.rows[0].get("月"), &["国語".to_string()]);
    assert_eq!(table.rows[1].get("火"), &["体育".to_string()]);
    assert_eq!(table.row_count, 2);
    assert_eq!(table.col_count, 3);
    assert_eq!(table.source, TableSource::Image);
    assert!(table.to_markdown().contains("| 1限 | 国語 | 算数 |"));
}

#[tokio::test]
async fn test_declared_unrepairable_table_only_in_unrepairable_list() {
    init_tracing();
    let client = ScriptedClient::new(&[r#"{"is_unrepairable": true, "reason": "column count varies per row"}"#]);
    let pipeline = TablePipeline::builder(PipelineConfig::default())
        .repair_client(client.clone())
        .build()
        .unwrap();

    let result = pipeline.process_document(vec![receipt_input("r1")]).await.unwrap();

    assert!(result.processed_tables.is_empty());
    assert!(result.skipped_tables.is_empty());
    assert_eq!(result.unrepairable_tables.len(), 1);
    assert_eq!(result.unrepairable_tables[0].ref_id, "r1");
    assert_eq!(result.unrepairable_tables[0].reason, "column count varies per row");
    assert_eq!(client.calls(), 1);
    assert!(client.prompts()[0].contains("牛乳"));
}

#[tokio::test]
async fn test_vision_client_transcribes_table_image() {
    let client = ScriptedClient::new(&[
        "Here is the table:\n```json\n{\"rows\": [[\"品名\", \"金額\"], [\"牛乳\", \"198\"]]}\n```",
    ]);
    let pipeline = TablePipeline::builder(PipelineConfig::default())
        .vision_client(client.clone())
        .build()
        .unwrap();

    let input = TableInput::new(vec![panel_record("r1", "p0", 0.0, 2, 2)]).with_sources(TableSources {
        image: Some(vec![0x89, b'P', b'N', b'G']),
        ..Default::default()
    });
    let table = processed(pipeline.process_table(&input).await.unwrap());

    assert_eq!(client.calls(), 1);
    assert_eq!(table.columns, vec!["row_label", "金額"]);
    assert_eq!(table.rows[0].row_label, "牛乳");
    assert_eq!(table.rows[0].get("金額"), &["198".to_string()]);
}

#[tokio::test]
async fn test_transient_repair_failure_keeps_original_table() {
    let mut config = PipelineConfig::default();
    config.ai.max_retries = 1;
    config.ai.retry_backoff_ms = 1;

    let client = Arc::new(UnreachableClient::default());
    let pipeline = TablePipeline::builder(config)
        .repair_client(client.clone())
        .build()
        .unwrap();

    let table = processed(pipeline.process_table(&receipt_input("r1")).await.unwrap());

    assert_eq!(client.calls(), 2);
    assert_eq!(table.status, TableStatus::Valid);
    assert!(table.status_history.contains(&TableStatus::AiRepairAttempted));
    assert!(!table.ai_repaired);
    assert_eq!(table.rows.len(), 2);
}

#[tokio::test]
async fn test_on_findings_mode_skips_repair_for_clean_tables() {
    let mut config = PipelineConfig::default();
    config.repair.mode = RepairMode::OnFindings;

    let client = ScriptedClient::new(&[]);
    let pipeline = TablePipeline::builder(config)
        .repair_client(client.clone())
        .build()
        .unwrap();

    let table = processed(pipeline.process_table(&receipt_input("r1")).await.unwrap());
    assert_eq!(client.calls(), 0);
    assert_eq!(table.status, TableStatus::Valid);
    assert!(table.validation_warnings.is_empty());
}

#[tokio::test]
async fn test_cached_outcome_is_reused() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        cache: Some(CacheConfig {
            dir: Some(temp_dir.path().to_path_buf()),
        }),
        ..Default::default()
    };

    let client = ScriptedClient::new(&[
        r#"{"headers": ["品名", "金額"], "rows": [["牛乳", "198"], ["パン", "150"]], "changes": "checked amounts"}"#,
    ]);
    let pipeline = TablePipeline::builder(config)
        .repair_client(client.clone())
        .build()
        .unwrap();

    let first = pipeline.process_table(&receipt_input("r1")).await.unwrap();
    let second = pipeline.process_table(&receipt_input("r1")).await.unwrap();

    assert_eq!(client.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(processed(second).repair_changes.as_deref(), Some("checked amounts"));
}

#[tokio::test]
async fn test_cache_entry_without_repair_client_not_reused_once_client_added() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        cache: Some(CacheConfig {
            dir: Some(temp_dir.path().to_path_buf()),
        }),
        ..Default::default()
    };

    let plain = TablePipeline::builder(config.clone()).build().unwrap();
    let first = plain.process_table(&receipt_input("r1")).await.unwrap();
    assert!(matches!(first, TableOutcome::Processed(_)));

    let client = ScriptedClient::new(&[r#"{"is_unrepairable": true, "reason": "column count varies per row"}"#]);
    let repairing = TablePipeline::builder(config)
        .repair_client(client.clone())
        .build()
        .unwrap();
    let second = repairing.process_table(&receipt_input("r1")).await.unwrap();

    assert_eq!(client.calls(), 1);
    match second {
        TableOutcome::Unrepairable(table) => assert_eq!(table.reason, "column count varies per row"),
        other => panic!("expected an unrepairable table, got {:?}", other),
    }
}
