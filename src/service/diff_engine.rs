//! 差异引擎: 把导入发票与账本已有记录逐条匹配并分类。
//!
//! 明细匹配顺序:
//! 1. 精确 key `发票号 | 归一化描述 | 数量 | 单价`
//! 2. 回退: 仅按归一化描述匹配第一条未被认领的已有明细
//!
//! 每条已有明细最多被一条导入明细认领, 未被认领的在发票已存在时输出为 REMOVED。

use bigdecimal::BigDecimal;
use std::collections::{HashMap, HashSet};

use crate::db::Ledger;
use crate::error::LedgerError;
use crate::models::{
    DiffCounts, DiffField, DiffType, FieldDiff, Invoice, InvoiceDiff, InvoiceLineItem,
    InvoiceSummary, LineItemDiff, LineItemSnapshot, MergeStrategy, ParsedInvoice,
    StandardLineItem, VoidedAction,
};
use crate::service::matching::{amounts_equal, existing_key, incoming_key, match_key, normalize_description};

/// 已有明细的双索引 + 认领集合
pub struct ExistingIndex<'a> {
    items: &'a [InvoiceLineItem],
    by_key: HashMap<String, Vec<usize>>,
    by_description: HashMap<String, Vec<usize>>,
    claimed: HashSet<usize>,
}

impl<'a> ExistingIndex<'a> {
    pub fn new(invoice_number: &str, items: &'a [InvoiceLineItem]) -> Self {
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_description: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, item) in items.iter().enumerate() {
            by_key
                .entry(match_key(invoice_number, &item.description, &item.quantity, &item.unit_price))
                .or_default()
                .push(idx);
            by_description
                .entry(normalize_description(&item.description))
                .or_default()
                .push(idx);
        }
        Self {
            items,
            by_key,
            by_description,
            claimed: HashSet::new(),
        }
    }

    /// 为导入明细认领一条已有明细
    pub fn claim(&mut self, incoming: &StandardLineItem) -> Option<&'a InvoiceLineItem> {
        let exact = match_key(
            &incoming.invoice_number,
            &incoming.description,
            &incoming.quantity,
            &incoming.unit_price,
        );
        let claimed = &self.claimed;
        let found = self
            .by_key
            .get(&exact)
            .and_then(|idxs| idxs.iter().copied().find(|i| !claimed.contains(i)))
            .or_else(|| {
                self.by_description
                    .get(&normalize_description(&incoming.description))
                    .and_then(|idxs| idxs.iter().copied().find(|i| !claimed.contains(i)))
            })?;
        self.claimed.insert(found);
        let items = self.items;
        Some(&items[found])
    }

    /// 未被认领的已有明细
    pub fn unclaimed(&self) -> impl Iterator<Item = &'a InvoiceLineItem> + '_ {
        let items = self.items;
        (0..items.len())
            .filter(move |i| !self.claimed.contains(i))
            .map(move |i| &items[i])
    }
}

fn field_diffs(existing: &InvoiceLineItem, incoming: &StandardLineItem) -> Vec<FieldDiff> {
    let pairs: [(DiffField, &BigDecimal, &BigDecimal); 3] = [
        (DiffField::Quantity, &existing.quantity, &incoming.quantity),
        (DiffField::UnitPrice, &existing.unit_price, &incoming.unit_price),
        (DiffField::TotalAmount, &existing.total_amount, &incoming.total_price),
    ];
    pairs
        .into_iter()
        .filter(|(_, old, new)| !amounts_equal(old, new))
        .map(|(field, old, new)| FieldDiff {
            field,
            old_value: old.clone(),
            new_value: new.clone(),
        })
        .collect()
}

fn incoming_summary(parsed: &ParsedInvoice) -> InvoiceSummary {
    InvoiceSummary {
        vendor: parsed.vendor.clone(),
        invoice_number: parsed.invoice_number.clone(),
        invoice_date: parsed.invoice_date,
        total_amount: parsed.total_amount.clone(),
        paid_date: parsed.paid_date,
        is_voided: parsed.is_voided,
        line_item_count: parsed.line_items.len(),
    }
}

fn existing_summary(parsed: &ParsedInvoice, invoice: &Invoice, items: &[InvoiceLineItem]) -> InvoiceSummary {
    InvoiceSummary {
        vendor: parsed.vendor.clone(),
        invoice_number: invoice.invoice_number.clone(),
        invoice_date: invoice.invoice_date,
        total_amount: invoice.total_amount.clone(),
        paid_date: invoice.paid_date,
        is_voided: invoice.is_voided(),
        line_item_count: items.len(),
    }
}

/// 计算单张发票的差异
pub fn diff_invoice(
    parsed: &ParsedInvoice,
    existing: Option<&Invoice>,
    existing_items: &[InvoiceLineItem],
    strategy: MergeStrategy,
) -> InvoiceDiff {
    let existing_items: &[InvoiceLineItem] = if existing.is_some() { existing_items } else { &[] };
    let mut index = ExistingIndex::new(&parsed.invoice_number, existing_items);
    let mut line_items = Vec::with_capacity(parsed.line_items.len());
    let mut counts = DiffCounts::default();

    for incoming in &parsed.line_items {
        let matched = index.claim(incoming);
        let (diff_type, fields) = match (parsed.is_voided, matched) {
            (true, _) => (DiffType::Voided, Vec::new()),
            (false, None) => (DiffType::New, Vec::new()),
            (false, Some(old)) => {
                let fields = field_diffs(old, incoming);
                if fields.is_empty() {
                    (DiffType::Unchanged, fields)
                } else {
                    (DiffType::Changed, fields)
                }
            }
        };
        counts.record(diff_type);
        line_items.push(LineItemDiff {
            diff_type,
            line_item_key: incoming_key(incoming),
            existing: matched.map(LineItemSnapshot::from),
            incoming: Some(LineItemSnapshot::from(incoming)),
            field_diffs: fields,
            selected: diff_type.selected_by_default(),
            merge_strategy: strategy,
        });
    }

    if existing.is_some() && !parsed.is_voided {
        for old in index.unclaimed() {
            counts.record(DiffType::Removed);
            line_items.push(LineItemDiff {
                diff_type: DiffType::Removed,
                line_item_key: existing_key(&parsed.invoice_number, old),
                existing: Some(LineItemSnapshot::from(old)),
                incoming: None,
                field_diffs: Vec::new(),
                selected: DiffType::Removed.selected_by_default(),
                merge_strategy: strategy,
            });
        }
    }

    let diff_type = if parsed.is_voided {
        DiffType::Voided
    } else if existing.is_none() {
        DiffType::New
    } else if counts.new_line_items > 0 || counts.changed_line_items > 0 {
        DiffType::Changed
    } else {
        DiffType::Unchanged
    };

    InvoiceDiff {
        diff_type,
        vendor: parsed.vendor.clone(),
        invoice_number: parsed.invoice_number.clone(),
        existing: existing.map(|inv| existing_summary(parsed, inv, existing_items)),
        incoming: incoming_summary(parsed),
        selected: line_items.iter().any(|li| li.selected),
        line_items,
        counts,
        // 作废发票默认不导入, 需要显式选择 import_unpaid
        voided_action: parsed.is_voided.then_some(VoidedAction::Skip),
    }
}

/// 逐张查询账本并计算差异
pub async fn diff_against_ledger(
    ledger: &dyn Ledger,
    invoices: &[ParsedInvoice],
    strategy: MergeStrategy,
) -> Result<Vec<InvoiceDiff>, LedgerError> {
    let mut diffs = Vec::with_capacity(invoices.len());
    for parsed in invoices {
        let existing = ledger.find_invoice_by_number(&parsed.invoice_number).await?;
        let existing_items = match &existing {
            Some(invoice) => ledger.list_invoice_line_items(invoice.id).await?,
            None => Vec::new(),
        };
        let diff = diff_invoice(parsed, existing.as_ref(), &existing_items, strategy);
        tracing::debug!(
            "Invoice {} diff {:?}: {:?}",
            diff.invoice_number, diff.diff_type, diff.counts
        );
        diffs.push(diff);
    }
    tracing::info!("Computed {} invoice diffs", diffs.len());
    Ok(diffs)
}
