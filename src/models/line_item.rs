use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::NormalizeError;

/// 原始行: 列名 -> 单元格 (保留源列顺序)
pub type RawRow = IndexMap<String, String>;

/// 原始表格 (任意列名)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    /// 从表头 + 行数组构建, 缺失的单元格按空串处理
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|cells| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| (h.clone(), cells.get(i).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect();
        Self { headers, rows }
    }

    /// 解析 CSV 文本, 表头保留原样 (包括首尾空格)
    pub fn from_csv(data: &str) -> Result<Self, NormalizeError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::None)
            .from_reader(data.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self::from_rows(headers, rows))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 标准化明细行 (与源格式无关)
///
/// `total_price` 是权威金额, 不假设 `quantity * unit_price == total_price`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardLineItem {
    pub vendor: String,
    pub invoice_number: String,
    pub invoice_date: Option<NaiveDate>,
    /// 月份名称 (如 "April"), 可为空
    pub service_month: String,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub total_price: BigDecimal,
    pub paid_date: Option<NaiveDate>,
    pub is_voided: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl StandardLineItem {
    /// 服务目录名称: 去掉描述末尾的服务期间
    pub fn service_name(&self) -> String {
        crate::service::normalizer::strip_service_period(&self.description)
    }
}

/// 按 (供应商, 发票号) 聚合后的发票
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedInvoice {
    pub vendor: String,
    pub invoice_number: String,
    pub invoice_date: Option<NaiveDate>,
    pub total_amount: BigDecimal,
    /// 任意明细作废即整张作废
    pub is_voided: bool,
    pub paid_date: Option<NaiveDate>,
    pub line_items: Vec<StandardLineItem>,
}
