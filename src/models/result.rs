use serde::{Deserialize, Serialize};

/// 单类实体的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl EntityCounts {
    pub fn add(&mut self, other: &EntityCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCounts {
    pub vendors: EntityCounts,
    pub subscriptions: EntityCounts,
    pub invoices: EntityCounts,
    pub services: EntityCounts,
    pub line_items: EntityCounts,
    /// csv_wins 更新时删除的旧明细
    pub line_items_deleted: usize,
    /// 删除后按原样写回的 REMOVED 明细 (未确认删除)
    pub line_items_preserved: usize,
}

impl BatchCounts {
    pub fn add(&mut self, other: &BatchCounts) {
        self.vendors.add(&other.vendors);
        self.subscriptions.add(&other.subscriptions);
        self.invoices.add(&other.invoices);
        self.services.add(&other.services);
        self.line_items.add(&other.line_items);
        self.line_items_deleted += other.line_items_deleted;
        self.line_items_preserved += other.line_items_preserved;
    }
}

/// 单张发票的失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceError {
    pub vendor: String,
    pub invoice_number: String,
    pub message: String,
}

/// 单批执行结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    pub batch_index: usize,
    pub total_batches: usize,
    pub has_more: bool,
    pub counts: BatchCounts,
    pub errors: Vec<InvoiceError>,
}

/// 全部批次汇总报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub success: bool,
    pub batches_run: usize,
    pub counts: BatchCounts,
    pub errors: Vec<InvoiceError>,
}

impl ImportReport {
    pub fn absorb(&mut self, batch: BatchResult) {
        self.batches_run += 1;
        self.counts.add(&batch.counts);
        self.errors.extend(batch.errors);
        self.success = self.errors.is_empty();
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| format!("{} / {}: {}", e.vendor, e.invoice_number, e.message))
            .collect()
    }
}

/// 合并预览计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePreview {
    pub invoices: i64,
    pub subscriptions: i64,
    pub services: i64,
    pub line_items: i64,
}

/// 合并实际移动的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCounts {
    pub moved_invoices: i64,
    pub moved_services: i64,
    pub moved_line_items: i64,
    pub deleted_subscriptions: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub success: bool,
    pub moved: MergeCounts,
    pub error: Option<String>,
}
