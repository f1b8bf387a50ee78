//! 外部列分类器接口与 HTTP 实现。
//!
//! 分类器只拿到表头与至多 10 行样本; 返回的开放映射在此处立即按封闭字段集校验。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ClassifierError;
use crate::models::{
    CanonicalField, ColumnMapping, CsvFormatType, MappingResult, RawRow, TransformRule,
    TransformRuleKind,
};

pub const SAMPLE_ROWS: usize = 10;

#[async_trait]
pub trait ColumnClassifier: Send + Sync {
    async fn classify(&self, headers: &[String], sample: &[RawRow]) -> Result<MappingResult, ClassifierError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyRequest<'a> {
    headers: &'a [String],
    sample_rows: &'a [RawRow],
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTransformRule {
    pub field: String,
    pub rule: String,
    #[serde(default)]
    pub description: String,
}

/// 分类器原始响应 (开放映射)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierResponse {
    pub format_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub mapping: HashMap<String, Option<String>>,
    #[serde(default)]
    pub transform_rules: Vec<RawTransformRule>,
    #[serde(default)]
    pub reasoning: String,
}

/// 通过 HTTP 调用的分类器
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl ColumnClassifier for HttpClassifier {
    async fn classify(&self, headers: &[String], sample: &[RawRow]) -> Result<MappingResult, ClassifierError> {
        let sample = &sample[..sample.len().min(SAMPLE_ROWS)];
        let response = self
            .client
            .post(&self.url)
            .json(&ClassifyRequest { headers, sample_rows: sample })
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        let parsed: ClassifierResponse = serde_json::from_str(&body)
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;
        validate_response(parsed, headers)
    }
}

/// 按源表头解析列名: 先精确, 再忽略大小写与首尾空白
fn resolve_column(column: &str, headers: &[String]) -> Option<String> {
    if let Some(h) = headers.iter().find(|h| h.as_str() == column) {
        return Some(h.clone());
    }
    let wanted = column.trim().to_lowercase();
    headers.iter().find(|h| h.trim().to_lowercase() == wanted).cloned()
}

/// 校验分类器响应
///
/// 未知字段与不存在的列被丢弃; 没有金额列的映射视为无效, 调用方回退到启发式。
pub fn validate_response(
    response: ClassifierResponse,
    headers: &[String],
) -> Result<MappingResult, ClassifierError> {
    let format_type = match response.format_type.trim().to_lowercase().as_str() {
        "invoice" => CsvFormatType::Invoice,
        "transaction" => CsvFormatType::Transaction,
        _ => CsvFormatType::Unknown,
    };

    let mut mapping = ColumnMapping::default();
    for (field_name, column) in &response.mapping {
        let Some(field) = CanonicalField::parse(field_name) else {
            tracing::debug!("Classifier returned unknown field '{}', ignored", field_name);
            continue;
        };
        let resolved = column.as_deref().and_then(|c| resolve_column(c, headers));
        if column.is_some() && resolved.is_none() {
            tracing::debug!("Classifier mapped {:?} to missing column {:?}", field, column);
        }
        mapping.set(field, resolved);
    }

    if !mapping.is_mapped(CanonicalField::TotalPrice) {
        return Err(ClassifierError::InvalidResponse("mapping has no amount column".to_string()));
    }

    let transform_rules = response
        .transform_rules
        .iter()
        .filter_map(|r| {
            Some(TransformRule {
                field: CanonicalField::parse(&r.field)?,
                rule: TransformRuleKind::parse(&r.rule)?,
                description: r.description.clone(),
            })
        })
        .collect();

    let confidence = if response.confidence.is_finite() {
        response.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(MappingResult {
        format_type,
        confidence,
        mapping,
        transform_rules,
        reasoning: response.reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::column_mapper::resolve_mapping;

    fn headers() -> Vec<String> {
        vec!["Posted".into(), "Payee".into(), " Amount ".into()]
    }

    fn response(json: &str) -> ClassifierResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn validation_drops_unknown_fields_and_columns() {
        let parsed = response(
            r#"{
                "formatType": "transaction",
                "confidence": 1.7,
                "mapping": {"vendor": "Payee", "total_price": "amount", "invoiceDate": "Missing", "colour": "Payee"},
                "transformRules": [
                    {"field": "totalPrice", "rule": "absolute_value", "description": "abs"},
                    {"field": "totalPrice", "rule": "multiply", "description": "?"}
                ],
                "reasoning": "card export"
            }"#,
        );
        let result = validate_response(parsed, &headers()).unwrap();
        assert_eq!(result.format_type, CsvFormatType::Transaction);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.mapping.vendor.as_deref(), Some("Payee"));
        assert_eq!(result.mapping.total_price.as_deref(), Some(" Amount "));
        assert_eq!(result.mapping.invoice_date, None);
        assert_eq!(result.transform_rules.len(), 1);
    }

    #[test]
    fn mapping_without_amount_is_invalid() {
        let parsed = response(r#"{"formatType": "invoice", "mapping": {"vendor": "Payee"}}"#);
        assert!(matches!(
            validate_response(parsed, &headers()),
            Err(ClassifierError::InvalidResponse(_))
        ));
    }

    struct BrokenClassifier;

    #[async_trait]
    impl ColumnClassifier for BrokenClassifier {
        async fn classify(&self, _: &[String], _: &[RawRow]) -> Result<MappingResult, ClassifierError> {
            Err(ClassifierError::InvalidResponse("not json".into()))
        }
    }

    #[tokio::test]
    async fn failing_classifier_falls_back() {
        let h = vec!["Payee".to_string(), "Date".to_string(), "Amount".to_string()];
        let result = resolve_mapping(&h, &[], Some(&BrokenClassifier)).await;
        assert_eq!(result.mapping.vendor.as_deref(), Some("Payee"));
        assert_eq!(result.mapping.total_price.as_deref(), Some("Amount"));
    }
}
