use bigdecimal::{BigDecimal, Zero};
use indexmap::IndexMap;

use crate::models::{ParsedInvoice, StandardLineItem};

/// 发票身份: (供应商小写, 发票号)
fn identity(item: &StandardLineItem) -> (String, String) {
    (item.vendor.trim().to_lowercase(), item.invoice_number.trim().to_string())
}

/// 按 (供应商, 发票号) 聚合明细, 保持首次出现的顺序
pub fn group_invoices(items: &[StandardLineItem]) -> Vec<ParsedInvoice> {
    let mut groups: IndexMap<(String, String), Vec<StandardLineItem>> = IndexMap::new();
    for item in items {
        groups.entry(identity(item)).or_default().push(item.clone());
    }

    groups
        .into_values()
        .map(|line_items| {
            let first = &line_items[0];
            let total_amount = line_items
                .iter()
                .fold(BigDecimal::zero(), |acc, li| acc + &li.total_price);
            ParsedInvoice {
                vendor: first.vendor.clone(),
                invoice_number: first.invoice_number.clone(),
                invoice_date: line_items.iter().find_map(|li| li.invoice_date),
                total_amount,
                is_voided: line_items.iter().any(|li| li.is_voided),
                paid_date: line_items.iter().find_map(|li| li.paid_date),
                line_items,
            }
        })
        .collect()
}

/// 将标准行切分为批次: 按发票打包, 不拆分发票
///
/// 当前批次行数达到 `batch_size` 即封口; 单张超大发票独占一批。
/// 因此一批的行数上限是 `batch_size - 1 + 最大单张发票行数`
/// (例如 49 行之后再放入一张 50 行的发票, 得到 99 行的批次)。
pub fn partition_batches(items: &[StandardLineItem], batch_size: usize) -> Vec<Vec<ParsedInvoice>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<ParsedInvoice> = Vec::new();
    let mut current_rows = 0;

    for invoice in group_invoices(items) {
        current_rows += invoice.line_items.len();
        current.push(invoice);
        if current_rows >= batch_size {
            batches.push(std::mem::take(&mut current));
            current_rows = 0;
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
