//! 行归一化: 任意列名的原始行 -> `StandardLineItem`。
//!
//! 两条路径:
//! - 固定列名的旧版发票导出 (`Vendor` / `Invoice` / `Line Item` / `Total Price` ...)
//! - 任意格式: 先推断列映射 (外部分类器或启发式), 再按声明式转换规则生成标准行
//!
//! 合计金额为 0 的行视为非金额噪声, 直接丢弃。

use bigdecimal::{BigDecimal, Zero};
use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::NormalizeError;
use crate::models::{
    CanonicalField, ColumnMapping, MappingResult, RawRow, RawTable, StandardLineItem, TransformRuleKind,
};
use crate::service::classifier::ColumnClassifier;
use crate::service::column_mapper;

/// 旧版格式的识别列
const LEGACY_REQUIRED: [&str; 4] = ["vendor", "invoice", "line item", "total price"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLayout {
    Legacy,
    Generic,
}

/// 归一化输出
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedImport {
    pub layout: SourceLayout,
    pub mapping: Option<MappingResult>,
    pub items: Vec<StandardLineItem>,
    /// 合计为 0 或缺少供应商而丢弃的行
    pub dropped_rows: usize,
}

/// 归一化入口, 分类器只在任意格式路径上调用一次
pub async fn normalize(
    table: &RawTable,
    classifier: Option<&dyn ColumnClassifier>,
) -> Result<NormalizedImport, NormalizeError> {
    if table.is_empty() {
        return Err(NormalizeError::Empty);
    }

    if is_legacy_layout(&table.headers) {
        let (items, dropped_rows) = normalize_legacy(table);
        tracing::info!("Legacy layout: {} line items, {} rows dropped", items.len(), dropped_rows);
        return Ok(NormalizedImport {
            layout: SourceLayout::Legacy,
            mapping: None,
            items,
            dropped_rows,
        });
    }

    let mapping = column_mapper::resolve_mapping(&table.headers, &table.rows, classifier).await;
    let (items, dropped_rows) = normalize_with_mapping(table, &mapping)?;
    tracing::info!(
        "Generic layout ({:?}, confidence {:.1}): {} line items, {} rows dropped",
        mapping.format_type, mapping.confidence, items.len(), dropped_rows
    );
    Ok(NormalizedImport {
        layout: SourceLayout::Generic,
        mapping: Some(mapping),
        items,
        dropped_rows,
    })
}

fn header_key(header: &str) -> String {
    header.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn is_legacy_layout(headers: &[String]) -> bool {
    let keys: Vec<String> = headers.iter().map(|h| header_key(h)).collect();
    LEGACY_REQUIRED.iter().all(|req| keys.iter().any(|k| k == req))
}

/// 按归一化列名取值的旧版行视图
struct LegacyRow<'a> {
    row: &'a RawRow,
    columns: &'a HashMap<String, String>,
}

impl<'a> LegacyRow<'a> {
    fn get(&self, names: &[&str]) -> &'a str {
        let (row, columns) = (self.row, self.columns);
        names
            .iter()
            .filter_map(|n| columns.get(*n))
            .filter_map(|header| row.get(header))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .unwrap_or("")
    }
}

/// 旧版固定列导出; 金额保留符号 (冲正行为负)
pub fn normalize_legacy(table: &RawTable) -> (Vec<StandardLineItem>, usize) {
    let columns: HashMap<String, String> = table
        .headers
        .iter()
        .map(|h| (header_key(h), h.clone()))
        .collect();

    let mut items = Vec::with_capacity(table.rows.len());
    let mut dropped = 0;
    for (idx, row) in table.rows.iter().enumerate() {
        let row = LegacyRow { row, columns: &columns };
        match legacy_item(idx, &row) {
            Some(item) => items.push(item),
            None => dropped += 1,
        }
    }
    (items, dropped)
}

fn legacy_item(idx: usize, row: &LegacyRow<'_>) -> Option<StandardLineItem> {
    let vendor = row.get(&["vendor"]).to_string();
    let total_price = parse_currency(row.get(&["total price"]));
    if vendor.is_empty() || total_price.is_zero() {
        tracing::debug!("Row {} dropped (vendor '{}', total {})", idx + 1, vendor, total_price);
        return None;
    }

    let description = row.get(&["line item"]).to_string();
    let invoice_date = parse_date(row.get(&["invoice date", "date"]));
    let period = extract_service_period(&description);
    let quantity = normalize_quantity(parse_currency(row.get(&["qty", "quantity"])));
    let unit_price = match row.get(&["unit price"]) {
        "" => derive_unit_price(&total_price, &quantity),
        raw => parse_currency(raw),
    };

    let service_month = match row.get(&["service month", "month"]) {
        "" => period
            .map(|(start, _)| start)
            .or(invoice_date)
            .map(month_name)
            .unwrap_or_default(),
        month => month.to_string(),
    };

    let invoice_number = match row.get(&["invoice", "invoice #", "invoice number"]) {
        "" => synthesize_invoice_number(idx, invoice_date, &vendor, &total_price),
        number => number.to_string(),
    };

    Some(StandardLineItem {
        vendor,
        invoice_number,
        invoice_date,
        service_month,
        description,
        quantity,
        unit_price,
        total_price,
        paid_date: parse_date(row.get(&["paid date", "paid"])),
        is_voided: is_truthy_void(row.get(&["void", "voided"])),
        period_start: period.map(|(s, _)| s),
        period_end: period.map(|(_, e)| e),
        notes: non_empty(row.get(&["notes"])),
        category: non_empty(row.get(&["category"])),
        transaction_id: None,
    })
}

/// 按列映射与转换规则归一化 (行级并行, 保持原顺序)
pub fn normalize_with_mapping(
    table: &RawTable,
    mapping: &MappingResult,
) -> Result<(Vec<StandardLineItem>, usize), NormalizeError> {
    let m = &mapping.mapping;
    let mut missing = Vec::new();
    if !m.is_mapped(CanonicalField::TotalPrice) {
        missing.push("totalPrice".to_string());
    }
    if !m.is_mapped(CanonicalField::Vendor) && !m.is_mapped(CanonicalField::Description) {
        missing.push("vendor".to_string());
    }
    if !missing.is_empty() {
        return Err(NormalizeError::MissingColumns(missing));
    }

    let rows: Vec<Option<StandardLineItem>> = table
        .rows
        .par_iter()
        .enumerate()
        .map(|(idx, row)| generic_item(idx, row, mapping))
        .collect();

    let dropped = rows.iter().filter(|r| r.is_none()).count();
    Ok((rows.into_iter().flatten().collect(), dropped))
}

fn generic_item(idx: usize, row: &RawRow, mapping: &MappingResult) -> Option<StandardLineItem> {
    let m = &mapping.mapping;
    let cell = |field: CanonicalField| mapped_cell(row, m, field);

    let description = cell(CanonicalField::Description).to_string();
    let vendor = match cell(CanonicalField::Vendor) {
        "" => description.clone(),
        v => v.to_string(),
    };

    let absolute = mapping.has_rule(TransformRuleKind::AbsoluteValue);
    let mut total_price = parse_currency(cell(CanonicalField::TotalPrice));
    if absolute {
        total_price = total_price.abs();
    }
    if vendor.is_empty() || total_price.is_zero() {
        tracing::debug!("Row {} dropped (vendor '{}', total {})", idx + 1, vendor, total_price);
        return None;
    }

    let quantity = normalize_quantity(parse_currency(cell(CanonicalField::Quantity)));
    let mut unit_price = match cell(CanonicalField::UnitPrice) {
        "" => derive_unit_price(&total_price, &quantity),
        raw => parse_currency(raw),
    };
    if absolute {
        unit_price = unit_price.abs();
    }

    let invoice_date = parse_date(cell(CanonicalField::InvoiceDate));
    let transaction_id = non_empty(cell(CanonicalField::TransactionId));
    let invoice_number = match (cell(CanonicalField::InvoiceNumber), &transaction_id) {
        ("", Some(txn)) => txn.clone(),
        ("", None) if mapping.has_rule(TransformRuleKind::GenerateInvoiceNumber) => {
            synthesize_invoice_number(idx, invoice_date, &vendor, &total_price)
        }
        ("", None) => format!("ROW-{}", idx + 1),
        (number, _) => number.to_string(),
    };

    let service_month = match cell(CanonicalField::ServiceMonth) {
        "" if mapping.has_rule(TransformRuleKind::DeriveServiceMonth) => {
            invoice_date.map(month_name).unwrap_or_default()
        }
        month => month.to_string(),
    };

    let period = extract_service_period(&description);
    Some(StandardLineItem {
        vendor,
        invoice_number,
        invoice_date,
        service_month,
        description,
        quantity,
        unit_price,
        total_price,
        paid_date: parse_date(cell(CanonicalField::PaidDate)),
        is_voided: is_void_status(cell(CanonicalField::Status)),
        period_start: period.map(|(s, _)| s),
        period_end: period.map(|(_, e)| e),
        notes: non_empty(cell(CanonicalField::Notes)),
        category: non_empty(cell(CanonicalField::Category)),
        transaction_id,
    })
}

fn mapped_cell<'a>(row: &'a RawRow, mapping: &'a ColumnMapping, field: CanonicalField) -> &'a str {
    mapping
        .get(field)
        .and_then(|col| row.get(col))
        .map(|v| v.trim())
        .unwrap_or("")
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// 数量缺失或为 0 时取 1
fn normalize_quantity(quantity: BigDecimal) -> BigDecimal {
    if quantity.is_zero() {
        BigDecimal::from(1)
    } else {
        quantity
    }
}

fn derive_unit_price(total: &BigDecimal, quantity: &BigDecimal) -> BigDecimal {
    if quantity.is_zero() {
        return total.clone();
    }
    (total / quantity).with_scale(4)
}

/// 解析货币字符串
///
/// 括号表示负数, 去掉千分位与货币符号; 空白、`-` 及无法解析的值都按 0 处理。
pub fn parse_currency(raw: &str) -> BigDecimal {
    // 括号负数可能夹在货币符号之后: `$(75.00)`, `$ (1,234.00)`, `($75.00)`
    let negative = {
        let body = raw.trim();
        let open = body.find('(');
        let close = body.rfind(')');
        matches!((open, close), (Some(o), Some(c)) if o < c)
    };

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '-' || c == '.') {
        return BigDecimal::zero();
    }

    match BigDecimal::from_str(&cleaned) {
        Ok(value) if negative => -value.abs(),
        Ok(value) => value,
        Err(_) => {
            tracing::debug!("Unparseable amount '{}', treated as 0", raw);
            BigDecimal::zero()
        }
    }
}

/// 两位年份按 50 年分界展开: >=50 -> 19xx, <50 -> 20xx
pub fn expand_two_digit_year(year: i32) -> i32 {
    if year >= 50 {
        1900 + year
    } else {
        2000 + year
    }
}

/// 解析 `M/D/YY` 或 `M/D/YYYY`
pub fn parse_slash_date(raw: &str) -> Option<NaiveDate> {
    let mut parts = raw.trim().split('/');
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let year_raw = parts.next()?.trim();
    if parts.next().is_some() {
        return None;
    }
    let year: i32 = year_raw.parse().ok()?;
    let year = match year_raw.len() {
        1 | 2 => expand_two_digit_year(year),
        4 => year,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// 宽松日期解析: ISO、斜杠格式及常见英文月份格式
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    // 带时间的 ISO 只取日期部分
    let date_part = raw.split(['T', ' ']).next().unwrap_or(raw);
    if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        return Some(date);
    }
    if let Some(date) = parse_slash_date(raw) {
        return Some(date);
    }
    ["%Y/%m/%d", "%b %d, %Y", "%B %d, %Y", "%d-%b-%Y", "%d %b %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// 描述末尾的 `M/D/YY-M/D/YY` 服务期间
pub fn extract_service_period(description: &str) -> Option<(NaiveDate, NaiveDate)> {
    let last = description.split_whitespace().last()?;
    let (start, end) = last.split_once('-')?;
    let start = parse_slash_date(start)?;
    let end = parse_slash_date(end)?;
    Some((start, end))
}

pub fn strip_service_period(description: &str) -> String {
    let trimmed = description.trim();
    if extract_service_period(trimmed).is_none() {
        return trimmed.to_string();
    }
    match trimmed.rsplit_once(char::is_whitespace) {
        Some((head, _)) => head.trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

pub fn month_name(date: NaiveDate) -> String {
    date.format("%B").to_string()
}

/// `日期-供应商前缀-金额`, 无日期时 `ROW-n`
pub fn synthesize_invoice_number(
    idx: usize,
    date: Option<NaiveDate>,
    vendor: &str,
    amount: &BigDecimal,
) -> String {
    let prefix: String = vendor
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(6)
        .collect::<String>()
        .to_uppercase();
    match date {
        Some(date) if !prefix.is_empty() => format!(
            "{:04}{:02}{:02}-{}-{}",
            date.year(),
            date.month(),
            date.day(),
            prefix,
            amount.abs().with_scale(2)
        ),
        _ => format!("ROW-{}", idx + 1),
    }
}

fn is_truthy_void(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "y" | "yes" | "true" | "x" | "1" | "void" | "voided"
    )
}

fn is_void_status(raw: &str) -> bool {
    let status = raw.to_lowercase();
    ["void", "cancel", "pending"].iter().any(|s| status.contains(s))
}
