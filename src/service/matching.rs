//! 匹配原语: 描述归一化、明细 key、金额容差、服务名模糊匹配。

use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::models::{InvoiceLineItem, Service, StandardLineItem};

/// 服务名包含匹配的最小长度
pub const FUZZY_MIN_NAME_LEN: usize = 10;

/// 金额/数量比较容差 0.01
pub fn amount_epsilon() -> BigDecimal {
    BigDecimal::from(1) / BigDecimal::from(100)
}

/// |a - b| < 0.01 视为相等
pub fn amounts_equal(a: &BigDecimal, b: &BigDecimal) -> bool {
    (a - b).abs() < amount_epsilon()
}

/// 小写 + 折叠空白
pub fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn money(value: &BigDecimal) -> String {
    value.with_scale(2).to_string()
}

fn qty(value: &BigDecimal) -> String {
    value.with_scale(4).to_string()
}

/// 稳定明细 key
///
/// 含合计金额, 因此描述相同的冲正/收费对不会冲突。
pub fn line_item_key(
    invoice_number: &str,
    description: &str,
    service_month: &str,
    quantity: &BigDecimal,
    unit_price: &BigDecimal,
    total: &BigDecimal,
) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        invoice_number.trim(),
        normalize_description(description),
        service_month.trim().to_lowercase(),
        qty(quantity),
        money(unit_price),
        money(total)
    )
}

pub fn incoming_key(item: &StandardLineItem) -> String {
    line_item_key(
        &item.invoice_number,
        &item.description,
        &item.service_month,
        &item.quantity,
        &item.unit_price,
        &item.total_price,
    )
}

pub fn existing_key(invoice_number: &str, item: &InvoiceLineItem) -> String {
    line_item_key(
        invoice_number,
        &item.description,
        &item.service_month,
        &item.quantity,
        &item.unit_price,
        &item.total_amount,
    )
}

/// 精确匹配 key: 发票号 | 归一化描述 | 数量 | 单价
pub fn match_key(invoice_number: &str, description: &str, quantity: &BigDecimal, unit_price: &BigDecimal) -> String {
    format!(
        "{}|{}|{}|{}",
        invoice_number.trim(),
        normalize_description(description),
        qty(quantity),
        money(unit_price)
    )
}

/// 服务名归一化: 小写并去掉全部空白
pub fn normalize_service_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 两阶段服务名匹配
///
/// 1. 归一化后完全相等
/// 2. 两者归一化长度都超过 `FUZZY_MIN_NAME_LEN` 时, 一方包含另一方
pub fn service_names_match(a: &str, b: &str) -> bool {
    let a = normalize_service_name(a);
    let b = normalize_service_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    a.chars().count() > FUZZY_MIN_NAME_LEN
        && b.chars().count() > FUZZY_MIN_NAME_LEN
        && (a.contains(&b) || b.contains(&a))
}

/// 在候选服务中查找匹配项, 精确匹配优先于包含匹配
pub fn find_service_match<'a>(name: &str, candidates: &'a [Service]) -> Option<&'a Service> {
    let wanted = normalize_service_name(name);
    candidates
        .iter()
        .find(|s| normalize_service_name(&s.name) == wanted)
        .or_else(|| candidates.iter().find(|s| service_names_match(name, &s.name)))
}

/// 仅当发票日期不早于服务最近更新日期时允许覆盖
pub fn service_update_allowed(invoice_date: Option<NaiveDate>, last_update: Option<NaiveDate>) -> bool {
    match (invoice_date, last_update) {
        (_, None) => true,
        (Some(date), Some(last)) => date >= last,
        (None, Some(_)) => false,
    }
}
