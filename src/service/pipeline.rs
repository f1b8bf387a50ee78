//! 导入编排: 预览 (解析 -> 归一化 -> 分组 -> 差异) 与逐批顺序执行。

use serde::Serialize;
use std::sync::Arc;

use crate::db::SharedLedger;
use crate::error::ImportError;
use crate::models::{
    ImportDecision, ImportReport, InvoiceDiff, MappingResult, MergeStrategy, RawTable, StandardLineItem,
};
use crate::service::classifier::ColumnClassifier;
use crate::service::decision::default_decisions;
use crate::service::diff_engine::diff_against_ledger;
use crate::service::executor::{index_decisions, BatchExecutor};
use crate::service::grouper::{group_invoices, partition_batches};
use crate::service::normalizer::{normalize, SourceLayout};

/// 导入预览, 不写账本
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub layout: SourceLayout,
    pub mapping: Option<MappingResult>,
    pub dropped_rows: usize,
    pub items: Vec<StandardLineItem>,
    pub diffs: Vec<InvoiceDiff>,
    pub total_batches: usize,
}

pub struct ImportPipeline {
    ledger: SharedLedger,
    classifier: Option<Arc<dyn ColumnClassifier>>,
    batch_size: usize,
}

impl ImportPipeline {
    pub fn new(ledger: SharedLedger, batch_size: usize) -> Self {
        Self {
            ledger,
            classifier: None,
            batch_size,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ColumnClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn preview(&self, table: &RawTable, strategy: MergeStrategy) -> Result<ImportPreview, ImportError> {
        let normalized = normalize(table, self.classifier.as_deref()).await?;
        let invoices = group_invoices(&normalized.items);
        let diffs = diff_against_ledger(self.ledger.as_ref(), &invoices, strategy).await?;
        let total_batches = if self.batch_size == 0 {
            0
        } else {
            partition_batches(&normalized.items, self.batch_size).len()
        };

        Ok(ImportPreview {
            layout: normalized.layout,
            mapping: normalized.mapping,
            dropped_rows: normalized.dropped_rows,
            items: normalized.items,
            diffs,
            total_batches,
        })
    }

    /// 顺序执行全部批次并汇总; 批 N+1 只在批 N 返回后开始
    pub async fn run(
        &self,
        rows: &[StandardLineItem],
        decisions: Option<&[ImportDecision]>,
        strategy: MergeStrategy,
    ) -> Result<ImportReport, ImportError> {
        if rows.is_empty() {
            return Err(ImportError::InvalidRequest("canonical rows are empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ImportError::InvalidRequest("batch size must be positive".to_string()));
        }

        // 只切分一次, 各批直接交给执行器
        let batches = partition_batches(rows, self.batch_size);
        let total_batches = batches.len();
        let decision_index = decisions.map(index_decisions);
        let executor = BatchExecutor::new(self.ledger.clone());
        let mut report = ImportReport::default();

        tracing::info!("开始导入: {} 行, {} 批", rows.len(), total_batches);
        for (batch_index, invoices) in batches.iter().enumerate() {
            let result = executor
                .execute_invoices(invoices, decision_index.as_ref(), strategy, batch_index, total_batches)
                .await;
            report.absorb(result);
        }

        tracing::info!(
            "导入完成: invoices +{} ~{} skip {}, errors {}",
            report.counts.invoices.created,
            report.counts.invoices.updated,
            report.counts.invoices.skipped,
            report.errors.len()
        );
        Ok(report)
    }

    /// 预览后按默认勾选直接导入
    pub async fn import_table(&self, table: &RawTable, strategy: MergeStrategy) -> Result<ImportReport, ImportError> {
        let preview = self.preview(table, strategy).await?;
        let decisions = default_decisions(&preview.diffs, strategy);
        self.run(&preview.items, Some(decisions.as_slice()), strategy).await
    }
}
