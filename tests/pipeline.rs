mod common;

use billing_import_rust::models::{DiffField, DiffType, ImportAction, MergeStrategy, RawTable};
use billing_import_rust::service::decision::default_decisions;
use billing_import_rust::service::normalizer::SourceLayout;
use billing_import_rust::{ImportError, ImportPipeline};
use common::*;

#[tokio::test]
async fn legacy_csv_preview_import_and_reimport() {
    let (memory, ledger) = memory_ledger();
    let pipeline = ImportPipeline::new(ledger, 50);
    let table = RawTable::from_csv(LEGACY_CSV).unwrap();

    let preview = pipeline.preview(&table, MergeStrategy::CsvWins).await.unwrap();
    assert_eq!(preview.layout, SourceLayout::Legacy);
    assert_eq!(preview.dropped_rows, 1);
    assert_eq!(preview.items.len(), 3);
    assert_eq!(preview.total_batches, 1);
    assert_eq!(preview.diffs.len(), 2);
    assert!(preview.diffs.iter().all(|d| d.diff_type == DiffType::New));

    let widget = &preview.items[0];
    assert_eq!(widget.quantity, d("2"));
    assert_eq!(widget.unit_price, d("50"));
    assert_eq!(widget.period_start, Some(date(2025, 4, 1)));
    assert_eq!(widget.period_end, Some(date(2025, 4, 30)));

    let report = pipeline.import_table(&table, MergeStrategy::CsvWins).await.unwrap();
    assert!(report.success);
    assert_eq!(report.batches_run, 1);
    assert_eq!(report.counts.invoices.created, 2);
    assert_eq!(report.counts.line_items.created, 3);

    let paid = memory.invoices().into_iter().find(|i| i.invoice_number == "INV-100").unwrap();
    assert_eq!(paid.status, "paid");
    assert_eq!(paid.paid_date, Some(date(2025, 4, 10)));
    let catalog: Vec<String> = memory.services().into_iter().map(|s| s.name).collect();
    assert!(catalog.contains(&"Widget Support".to_string()));

    // 同一文件再次预览: 全部 UNCHANGED, 默认决策什么都不写
    let again = pipeline.preview(&table, MergeStrategy::CsvWins).await.unwrap();
    assert!(again.diffs.iter().all(|d| d.diff_type == DiffType::Unchanged));
    let decisions = default_decisions(&again.diffs, MergeStrategy::CsvWins);
    assert!(decisions.iter().all(|d| d.action == ImportAction::Skip));

    let report = pipeline.import_table(&table, MergeStrategy::CsvWins).await.unwrap();
    assert_eq!(report.counts.invoices.skipped, 2);
    assert_eq!(memory.line_items().len(), 3);
}

#[tokio::test]
async fn changed_total_is_reported_and_applied() {
    let (memory, ledger) = memory_ledger();
    let pipeline = ImportPipeline::new(ledger, 50);
    let table = RawTable::from_csv(LEGACY_CSV).unwrap();
    pipeline.import_table(&table, MergeStrategy::CsvWins).await.unwrap();

    let changed_csv = LEGACY_CSV.replace("2,50.00,100.00", "2,50.00,110.00");
    let changed = RawTable::from_csv(&changed_csv).unwrap();
    let preview = pipeline.preview(&changed, MergeStrategy::CsvWins).await.unwrap();

    let inv = preview.diffs.iter().find(|d| d.invoice_number == "INV-100").unwrap();
    assert_eq!(inv.diff_type, DiffType::Changed);
    assert_eq!(inv.counts.changed_line_items, 1);
    assert_eq!(inv.counts.unchanged_line_items, 1);
    let line = inv.line_items.iter().find(|li| li.diff_type == DiffType::Changed).unwrap();
    assert_eq!(line.field_diffs.len(), 1);
    assert_eq!(line.field_diffs[0].field, DiffField::TotalAmount);
    assert_eq!(line.field_diffs[0].old_value, d("100"));
    assert_eq!(line.field_diffs[0].new_value, d("110"));

    let globex = preview.diffs.iter().find(|d| d.invoice_number == "INV-200").unwrap();
    assert_eq!(globex.diff_type, DiffType::Unchanged);

    let report = pipeline.import_table(&changed, MergeStrategy::CsvWins).await.unwrap();
    assert!(report.success);
    assert_eq!(report.counts.invoices.updated, 1);
    assert_eq!(report.counts.invoices.skipped, 1);

    let inv = memory.invoices().into_iter().find(|i| i.invoice_number == "INV-100").unwrap();
    assert_eq!(inv.total_amount, d("150"));
    assert_eq!(memory.line_items().len(), 3);
}

#[tokio::test]
async fn generic_transaction_export_uses_heuristics() {
    let (_memory, ledger) = memory_ledger();
    let pipeline = ImportPipeline::new(ledger, 50);
    let table = RawTable::from_csv(
        "Transaction Date,Merchant,Amount,Description\n\
         2025-04-05,Cloudflare,-20.00,CDN plan\n\
         2025-04-06,Linear,-8.00,Seats\n",
    )
    .unwrap();

    let preview = pipeline.preview(&table, MergeStrategy::CsvWins).await.unwrap();
    assert_eq!(preview.layout, SourceLayout::Generic);
    assert!(preview.mapping.is_some());
    assert_eq!(preview.items.len(), 2);
    assert_eq!(preview.items[0].total_price, d("20"));
    assert_eq!(preview.items[0].vendor, "Cloudflare");
    assert_ne!(preview.items[0].invoice_number, preview.items[1].invoice_number);
    assert_eq!(preview.diffs.len(), 2);
}

#[tokio::test]
async fn run_executes_every_batch_in_order() {
    let (memory, ledger) = memory_ledger();
    let pipeline = ImportPipeline::new(ledger, 1);

    let report = pipeline
        .run(&sample_rows(), None, MergeStrategy::CsvWins)
        .await
        .unwrap();
    assert!(report.success);
    assert_eq!(report.batches_run, 3);
    assert_eq!(report.counts.invoices.created, 3);
    assert_eq!(report.counts.vendors.created, 2);
    assert_eq!(memory.invoices().len(), 3);
}

#[tokio::test]
async fn run_aggregates_errors_across_batches() {
    let (_memory, faulty, ledger) = faulty_ledger();
    faulty.reject_invoice("INV-1");
    faulty.reject_invoice("INV-9");
    let pipeline = ImportPipeline::new(ledger, 1);

    let report = pipeline
        .run(&sample_rows(), None, MergeStrategy::CsvWins)
        .await
        .unwrap();
    assert!(!report.success);
    assert_eq!(report.batches_run, 3);
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.error_messages().len(), 2);
    assert_eq!(report.counts.invoices.created, 1);
}

#[tokio::test]
async fn empty_input_is_rejected() {
    let (_memory, ledger) = memory_ledger();
    let pipeline = ImportPipeline::new(ledger, 50);

    let err = pipeline.run(&[], None, MergeStrategy::CsvWins).await.unwrap_err();
    assert!(matches!(err, ImportError::InvalidRequest(_)));

    let table = RawTable::from_csv("Vendor,Invoice,Line Item,Total Price\n").unwrap();
    let err = pipeline.preview(&table, MergeStrategy::CsvWins).await.unwrap_err();
    assert!(matches!(err, ImportError::Normalize(_)));
}
