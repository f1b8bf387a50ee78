use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::decision::MergeStrategy;
use super::ledger::InvoiceLineItem;
use super::line_item::StandardLineItem;

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiffType {
    New,
    Changed,
    Unchanged,
    Removed,
    Voided,
}

impl DiffType {
    /// 默认勾选策略: NEW/CHANGED/VOIDED 勾选, UNCHANGED/REMOVED 不勾选
    pub fn selected_by_default(self) -> bool {
        matches!(self, DiffType::New | DiffType::Changed | DiffType::Voided)
    }
}

/// 作废发票的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidedAction {
    ImportUnpaid,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffField {
    Quantity,
    UnitPrice,
    TotalAmount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub field: DiffField,
    pub old_value: BigDecimal,
    pub new_value: BigDecimal,
}

/// 明细快照 (账本侧与导入侧同构)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemSnapshot {
    pub description: String,
    pub service_month: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

impl From<&StandardLineItem> for LineItemSnapshot {
    fn from(item: &StandardLineItem) -> Self {
        Self {
            description: item.description.clone(),
            service_month: item.service_month.clone(),
            quantity: item.quantity.clone(),
            unit_price: item.unit_price.clone(),
            total_amount: item.total_price.clone(),
            period_start: item.period_start,
            period_end: item.period_end,
        }
    }
}

impl From<&InvoiceLineItem> for LineItemSnapshot {
    fn from(item: &InvoiceLineItem) -> Self {
        Self {
            description: item.description.clone(),
            service_month: item.service_month.clone(),
            quantity: item.quantity.clone(),
            unit_price: item.unit_price.clone(),
            total_amount: item.total_amount.clone(),
            period_start: item.period_start,
            period_end: item.period_end,
        }
    }
}

/// 明细级差异
///
/// REMOVED 时 `incoming` 为空, NEW 时 `existing` 为空, CHANGED/UNCHANGED 两者都有。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemDiff {
    pub diff_type: DiffType,
    pub line_item_key: String,
    pub existing: Option<LineItemSnapshot>,
    pub incoming: Option<LineItemSnapshot>,
    pub field_diffs: Vec<FieldDiff>,
    pub selected: bool,
    pub merge_strategy: MergeStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub vendor: String,
    pub invoice_number: String,
    pub invoice_date: Option<NaiveDate>,
    pub total_amount: BigDecimal,
    pub paid_date: Option<NaiveDate>,
    pub is_voided: bool,
    pub line_item_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffCounts {
    pub new_line_items: usize,
    pub changed_line_items: usize,
    pub unchanged_line_items: usize,
    pub removed_line_items: usize,
    pub voided_line_items: usize,
}

impl DiffCounts {
    pub fn record(&mut self, diff_type: DiffType) {
        match diff_type {
            DiffType::New => self.new_line_items += 1,
            DiffType::Changed => self.changed_line_items += 1,
            DiffType::Unchanged => self.unchanged_line_items += 1,
            DiffType::Removed => self.removed_line_items += 1,
            DiffType::Voided => self.voided_line_items += 1,
        }
    }
}

/// 发票级差异
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDiff {
    pub diff_type: DiffType,
    pub vendor: String,
    pub invoice_number: String,
    pub existing: Option<InvoiceSummary>,
    pub incoming: InvoiceSummary,
    pub line_items: Vec<LineItemDiff>,
    pub counts: DiffCounts,
    pub selected: bool,
    /// 仅 VOIDED 时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voided_action: Option<VoidedAction>,
}
