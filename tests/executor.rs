mod common;

use billing_import_rust::models::{ImportAction, ImportDecision, InvoiceStatus, MergeStrategy};
use billing_import_rust::service::decision::default_decisions;
use billing_import_rust::service::diff_engine::diff_against_ledger;
use billing_import_rust::service::grouper::group_invoices;
use billing_import_rust::service::{BatchExecutor, BatchSpec};
use billing_import_rust::ImportError;
use common::*;

fn single_batch() -> BatchSpec {
    BatchSpec {
        batch_index: 0,
        batch_size: 50,
        total_batches: Some(1),
    }
}

#[tokio::test]
async fn creates_vendor_and_master_subscription_once() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger);

    let result = executor
        .execute(&sample_rows(), None, MergeStrategy::CsvWins, single_batch())
        .await
        .unwrap();

    assert!(result.success);
    assert!(!result.has_more);
    assert_eq!(result.total_batches, 1);
    assert_eq!(result.counts.vendors.created, 2);
    assert_eq!(result.counts.subscriptions.created, 2);
    assert_eq!(result.counts.invoices.created, 3);
    assert_eq!(result.counts.line_items.created, 4);
    assert_eq!(result.counts.services.created, 3);
    assert_eq!(result.counts.services.updated, 1);

    assert_eq!(memory.vendors().len(), 2);
    assert_eq!(memory.subscriptions().len(), 2);
    assert_eq!(memory.line_items().len(), 4);
    assert!(memory.line_items().iter().all(|li| li.service_id.is_some()));
    assert!(memory.orphaned_line_items().is_empty());

    let inv1 = memory.invoices().into_iter().find(|i| i.invoice_number == "INV-1").unwrap();
    assert_eq!(inv1.total_amount, d("140"));
    assert_eq!(inv1.status, InvoiceStatus::Unpaid.as_str());
}

#[tokio::test]
async fn csv_wins_reimport_is_idempotent() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger);
    let rows = sample_rows();

    executor.execute(&rows, None, MergeStrategy::CsvWins, single_batch()).await.unwrap();
    let snapshot = |memory: &billing_import_rust::MemoryLedger| {
        let mut items: Vec<_> = memory
            .line_items()
            .into_iter()
            .map(|li| (li.invoice_id, li.service_id, li.description, li.quantity, li.unit_price, li.total_amount))
            .collect();
        items.sort_by(|a, b| (a.0, &a.2).cmp(&(b.0, &b.2)));
        items
    };
    let first = snapshot(&*memory);

    let second_run = executor.execute(&rows, None, MergeStrategy::CsvWins, single_batch()).await.unwrap();
    assert!(second_run.success);
    assert_eq!(second_run.counts.invoices.updated, 3);
    assert_eq!(second_run.counts.invoices.created, 0);
    assert_eq!(second_run.counts.line_items_deleted, 4);
    assert_eq!(second_run.counts.vendors.created, 0);

    assert_eq!(snapshot(&*memory), first);
    assert_eq!(memory.services().len(), 3);
}

#[tokio::test]
async fn failing_invoice_does_not_abort_batch() {
    let (memory, faulty, ledger) = faulty_ledger();
    faulty.reject_invoice("INV-2");
    let executor = BatchExecutor::new(ledger);

    let result = executor
        .execute(&sample_rows(), None, MergeStrategy::CsvWins, single_batch())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].invoice_number, "INV-2");
    assert_eq!(result.counts.invoices.created, 2);
    assert!(memory.invoices().iter().any(|i| i.invoice_number == "INV-9"));
}

#[tokio::test]
async fn failed_reimport_leaves_existing_invoice_intact() {
    let (memory, faulty, ledger) = faulty_ledger();
    let executor = BatchExecutor::new(ledger);
    executor.execute(&sample_rows(), None, MergeStrategy::CsvWins, single_batch()).await.unwrap();

    let inv1 = memory.invoices().into_iter().find(|i| i.invoice_number == "INV-1").unwrap();
    assert_eq!(inv1.total_amount, d("140.00"));
    let items_before = memory.line_items().into_iter().filter(|li| li.invoice_id == inv1.id).count();
    assert_eq!(items_before, 2);

    let changed = vec![
        item("Acme Inc", "INV-1", "Widget Support", "110.00"),
        item("Acme Inc", "INV-1", "Hosting", "40.00"),
    ];
    faulty.dangling_line_items(true);
    let result = executor
        .execute(&changed, None, MergeStrategy::CsvWins, single_batch())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].invoice_number, "INV-1");
    assert_eq!(result.counts.invoices.updated, 0);
    assert_eq!(result.counts.line_items_deleted, 0);

    // 表头与旧明细都保持导入前的状态
    let after = memory.invoices().into_iter().find(|i| i.id == inv1.id).unwrap();
    assert_eq!(after.total_amount, d("140.00"));
    let items_after: Vec<_> = memory.line_items().into_iter().filter(|li| li.invoice_id == inv1.id).collect();
    assert_eq!(items_after.len(), 2);
    assert!(items_after.iter().any(|li| li.total_amount == d("100.00")));
    assert!(memory.orphaned_line_items().is_empty());

    faulty.dangling_line_items(false);
    let retried = executor
        .execute(&changed, None, MergeStrategy::CsvWins, single_batch())
        .await
        .unwrap();
    assert!(retried.success);
    let fixed = memory.invoices().into_iter().find(|i| i.id == inv1.id).unwrap();
    assert_eq!(fixed.total_amount, d("150.00"));
}

#[tokio::test]
async fn keep_existing_leaves_invoice_untouched() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger);
    executor.execute(&sample_rows(), None, MergeStrategy::CsvWins, single_batch()).await.unwrap();

    let changed = vec![item("Globex", "INV-9", "Consulting Hours", "300.00")];
    let result = executor
        .execute(&changed, None, MergeStrategy::KeepExisting, single_batch())
        .await
        .unwrap();

    assert_eq!(result.counts.invoices.skipped, 1);
    assert_eq!(result.counts.line_items.skipped, 1);
    let inv = memory.invoices().into_iter().find(|i| i.invoice_number == "INV-9").unwrap();
    assert_eq!(inv.total_amount, d("250"));
}

#[tokio::test]
async fn skip_strategy_writes_nothing() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger);

    let result = executor
        .execute(&sample_rows(), None, MergeStrategy::Skip, single_batch())
        .await
        .unwrap();

    assert_eq!(result.counts.invoices.skipped, 3);
    assert!(memory.vendors().is_empty());
    assert!(memory.invoices().is_empty());
}

#[tokio::test]
async fn voided_invoice_needs_explicit_import() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger.clone());
    let rows = vec![voided(item("Initech", "INV-V", "Printer Lease", "80.00"))];

    let result = executor.execute(&rows, None, MergeStrategy::CsvWins, single_batch()).await.unwrap();
    assert_eq!(result.counts.invoices.skipped, 1);
    assert!(memory.invoices().is_empty());

    // 默认决策同样跳过作废发票
    let diffs = diff_against_ledger(ledger.as_ref(), &group_invoices(&rows), MergeStrategy::CsvWins)
        .await
        .unwrap();
    let mut decisions = default_decisions(&diffs, MergeStrategy::CsvWins);
    assert_eq!(decisions[0].action, ImportAction::Skip);

    decisions[0].action = ImportAction::Import;
    let result = executor
        .execute(&rows, Some(decisions.as_slice()), MergeStrategy::CsvWins, single_batch())
        .await
        .unwrap();
    assert_eq!(result.counts.invoices.created, 1);

    let inv = &memory.invoices()[0];
    assert_eq!(inv.status, InvoiceStatus::Pending.as_str());
    assert!(inv.is_voided());
    assert_eq!(inv.paid_date, None);
}

#[tokio::test]
async fn invoices_without_decision_are_skipped() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger);
    let decisions: Vec<ImportDecision> = Vec::new();

    let result = executor
        .execute(&sample_rows(), Some(decisions.as_slice()), MergeStrategy::CsvWins, single_batch())
        .await
        .unwrap();

    assert_eq!(result.counts.invoices.skipped, 3);
    assert!(memory.invoices().is_empty());
}

#[tokio::test]
async fn older_invoice_does_not_clobber_service_pricing() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger);

    let may = vec![dated(item("Acme Inc", "INV-MAY", "Platform License Fee", "100.00"), date(2025, 5, 1))];
    executor.execute(&may, None, MergeStrategy::CsvWins, single_batch()).await.unwrap();

    let april = vec![dated(item("Acme Inc", "INV-APR", "Platform License Fee", "80.00"), date(2025, 4, 1))];
    let result = executor.execute(&april, None, MergeStrategy::CsvWins, single_batch()).await.unwrap();
    assert_eq!(result.counts.services.skipped, 1);
    assert_eq!(memory.services().len(), 1);
    assert_eq!(memory.services()[0].unit_price, d("100"));
    assert_eq!(memory.services()[0].last_invoice_date, Some(date(2025, 5, 1)));

    // 两张发票的明细都挂在同一个服务上
    let service_id = memory.services()[0].id;
    assert!(memory.line_items().iter().all(|li| li.service_id == Some(service_id)));

    let june = vec![dated(item("Acme Inc", "INV-JUN", "platform license  fee", "120.00"), date(2025, 6, 1))];
    let result = executor.execute(&june, None, MergeStrategy::CsvWins, single_batch()).await.unwrap();
    assert_eq!(result.counts.services.updated, 1);
    assert_eq!(memory.services()[0].unit_price, d("120"));
}

#[tokio::test]
async fn removed_items_survive_unless_removal_selected() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger.clone());
    executor.execute(&sample_rows(), None, MergeStrategy::CsvWins, single_batch()).await.unwrap();

    // 新文件中 INV-1 只剩一条明细, 且金额变化
    let rows = vec![item("Acme Inc", "INV-1", "Widget Support", "120.00")];
    let result = executor.execute(&rows, None, MergeStrategy::CsvWins, single_batch()).await.unwrap();
    assert_eq!(result.counts.line_items_deleted, 2);
    assert_eq!(result.counts.line_items_preserved, 1);

    let inv = memory.invoices().into_iter().find(|i| i.invoice_number == "INV-1").unwrap();
    let items: Vec<_> = memory.line_items().into_iter().filter(|li| li.invoice_id == inv.id).collect();
    assert_eq!(items.len(), 2);
    assert_eq!(inv.total_amount, d("160"));

    // 操作员确认删除 REMOVED 明细
    let diffs = diff_against_ledger(ledger.as_ref(), &group_invoices(&rows), MergeStrategy::CsvWins)
        .await
        .unwrap();
    let mut decisions = default_decisions(&diffs, MergeStrategy::CsvWins);
    for li in decisions[0].line_items.iter_mut() {
        li.action = ImportAction::Import;
    }
    decisions[0].action = ImportAction::Import;
    let result = executor
        .execute(&rows, Some(decisions.as_slice()), MergeStrategy::CsvWins, single_batch())
        .await
        .unwrap();
    assert_eq!(result.counts.line_items_preserved, 0);

    let items: Vec<_> = memory.line_items().into_iter().filter(|li| li.invoice_id == inv.id).collect();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].total_amount, d("120"));
}

#[tokio::test]
async fn new_invoice_writes_only_selected_items() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger.clone());
    let rows = sample_rows();

    let diffs = diff_against_ledger(ledger.as_ref(), &group_invoices(&rows), MergeStrategy::CsvWins)
        .await
        .unwrap();
    let mut decisions = default_decisions(&diffs, MergeStrategy::CsvWins);
    let inv1 = decisions.iter_mut().find(|d| d.invoice_number == "INV-1").unwrap();
    inv1.line_items[1].action = ImportAction::Skip;

    let result = executor
        .execute(&rows, Some(decisions.as_slice()), MergeStrategy::CsvWins, single_batch())
        .await
        .unwrap();
    assert_eq!(result.counts.line_items.created, 3);
    assert_eq!(result.counts.line_items.skipped, 1);
    assert!(!memory.line_items().iter().any(|li| li.description == "Hosting"));
}

#[tokio::test]
async fn batches_are_resumable_by_index() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger);
    let rows = sample_rows();

    let spec = |batch_index| BatchSpec {
        batch_index,
        batch_size: 1,
        total_batches: Some(3),
    };
    let first = executor.execute(&rows, None, MergeStrategy::CsvWins, spec(0)).await.unwrap();
    assert_eq!(first.total_batches, 3);
    assert!(first.has_more);
    assert_eq!(first.counts.invoices.created, 1);
    // INV-1 有两行, 不被拆开
    assert_eq!(first.counts.line_items.created, 2);

    let last = executor.execute(&rows, None, MergeStrategy::CsvWins, spec(2)).await.unwrap();
    assert!(!last.has_more);
    assert_eq!(memory.invoices().len(), 2);
}

#[tokio::test]
async fn malformed_requests_are_rejected_before_writes() {
    let (memory, ledger) = memory_ledger();
    let executor = BatchExecutor::new(ledger);

    let err = executor
        .execute(&[], None, MergeStrategy::CsvWins, single_batch())
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::InvalidRequest(_)));

    let zero = BatchSpec {
        batch_size: 0,
        ..single_batch()
    };
    let err = executor
        .execute(&sample_rows(), None, MergeStrategy::CsvWins, zero)
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::InvalidRequest(_)));

    let out_of_range = BatchSpec {
        batch_index: 5,
        ..single_batch()
    };
    let err = executor
        .execute(&sample_rows(), None, MergeStrategy::CsvWins, out_of_range)
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::InvalidRequest(_)));

    assert!(memory.vendors().is_empty());
}
