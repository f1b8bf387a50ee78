//! 启发式列映射: 按列名子串推断标准字段, 总能给出结果。

use std::collections::HashSet;

use crate::models::{
    CanonicalField, ColumnMapping, CsvFormatType, MappingResult, RawRow, TransformRule,
    TransformRuleKind,
};
use crate::service::classifier::{ColumnClassifier, SAMPLE_ROWS};

/// (字段, 包含任一子串, 排除子串), 按优先级排列
const HEURISTICS: &[(CanonicalField, &[&str], &[&str])] = &[
    (
        CanonicalField::TransactionId,
        &["transaction id", "transaction #", "reference", "ref #", "ref no", "confirmation"],
        &[],
    ),
    (
        CanonicalField::InvoiceNumber,
        &["invoice #", "invoice number", "invoice no", "invoice id", "inv #", "invoice"],
        &["date", "amount", "total"],
    ),
    (
        CanonicalField::PaidDate,
        &["paid date", "payment date", "date paid", "paid on", "post date", "posted"],
        &[],
    ),
    (
        CanonicalField::InvoiceDate,
        &["invoice date", "transaction date", "trans date", "bill date", "date"],
        &["paid", "due", "post"],
    ),
    (
        CanonicalField::ServiceMonth,
        &["service month", "billing month", "service period", "month", "period"],
        &[],
    ),
    (
        CanonicalField::Vendor,
        &["merchant", "vendor", "supplier", "payee", "company", "provider"],
        &[],
    ),
    (CanonicalField::Quantity, &["qty", "quantity", "units"], &[]),
    (
        CanonicalField::UnitPrice,
        &["unit price", "unit cost", "rate", "price"],
        &["total"],
    ),
    (
        CanonicalField::TotalPrice,
        &["total price", "total", "amount", "charge", "debit", "cost"],
        &["unit"],
    ),
    (
        CanonicalField::Description,
        &["description", "line item", "item", "memo", "details", "service", "product"],
        &["month", "date", "period"],
    ),
    (CanonicalField::Status, &["status", "void", "state"], &[]),
    (CanonicalField::Notes, &["note", "comment"], &[]),
    (CanonicalField::Category, &["category", "type", "class"], &[]),
];

fn normalize_header(header: &str) -> String {
    header.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// 启发式映射; `unknown` 置信度 0.3, 其余 0.7
pub fn heuristic_mapping(headers: &[String]) -> MappingResult {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut mapping = ColumnMapping::default();

    for (field, includes, excludes) in HEURISTICS {
        let hit = includes.iter().find_map(|pattern| {
            normalized.iter().enumerate().position(|(i, h)| {
                !claimed.contains(&i)
                    && !h.is_empty()
                    && h.contains(pattern)
                    && !excludes.iter().any(|ex| h.contains(ex))
            })
        });
        if let Some(idx) = hit {
            claimed.insert(idx);
            mapping.set(*field, Some(headers[idx].clone()));
        }
    }

    let format_type = if mapping.is_mapped(CanonicalField::InvoiceNumber) {
        CsvFormatType::Invoice
    } else if mapping.is_mapped(CanonicalField::TransactionId)
        || (mapping.is_mapped(CanonicalField::InvoiceDate)
            && mapping.is_mapped(CanonicalField::TotalPrice)
            && (mapping.is_mapped(CanonicalField::Vendor)
                || mapping.is_mapped(CanonicalField::Description)))
    {
        CsvFormatType::Transaction
    } else {
        CsvFormatType::Unknown
    };

    let transform_rules = default_rules(format_type, &mapping);
    let confidence = if format_type == CsvFormatType::Unknown { 0.3 } else { 0.7 };
    let mapped = CanonicalField::ALL.iter().filter(|f| mapping.is_mapped(**f)).count();

    MappingResult {
        format_type,
        confidence,
        mapping,
        transform_rules,
        reasoning: format!(
            "heuristic column-name match: {} of {} fields mapped",
            mapped,
            CanonicalField::ALL.len()
        ),
    }
}

/// 由格式与映射推导默认转换规则
pub fn default_rules(format_type: CsvFormatType, mapping: &ColumnMapping) -> Vec<TransformRule> {
    let mut rules = Vec::new();
    if format_type != CsvFormatType::Invoice {
        rules.push(TransformRule {
            field: CanonicalField::TotalPrice,
            rule: TransformRuleKind::AbsoluteValue,
            description: "charges exported as negative amounts are stored as positive".to_string(),
        });
    }
    if !mapping.is_mapped(CanonicalField::InvoiceNumber) && !mapping.is_mapped(CanonicalField::TransactionId) {
        rules.push(TransformRule {
            field: CanonicalField::InvoiceNumber,
            rule: TransformRuleKind::GenerateInvoiceNumber,
            description: "no invoice or transaction id column; synthesize date-vendor-amount".to_string(),
        });
    }
    if !mapping.is_mapped(CanonicalField::ServiceMonth) {
        rules.push(TransformRule {
            field: CanonicalField::ServiceMonth,
            rule: TransformRuleKind::DeriveServiceMonth,
            description: "service month taken from invoice date".to_string(),
        });
    }
    rules
}

/// 优先使用外部分类器, 任何失败都回退到启发式映射
pub async fn resolve_mapping(
    headers: &[String],
    rows: &[RawRow],
    classifier: Option<&dyn ColumnClassifier>,
) -> MappingResult {
    let Some(classifier) = classifier else {
        return heuristic_mapping(headers);
    };

    let sample = &rows[..rows.len().min(SAMPLE_ROWS)];
    match classifier.classify(headers, sample).await {
        Ok(result) => {
            tracing::info!(
                "Classifier mapping: {:?} (confidence {:.2})",
                result.format_type, result.confidence
            );
            result
        }
        Err(e) => {
            tracing::warn!("Classifier unavailable, falling back to heuristic mapping: {}", e);
            heuristic_mapping(headers)
        }
    }
}
