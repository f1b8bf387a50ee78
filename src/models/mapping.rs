use serde::{Deserialize, Serialize};

/// 标准字段集合 (封闭)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalField {
    Vendor,
    InvoiceNumber,
    TransactionId,
    InvoiceDate,
    ServiceMonth,
    Description,
    Quantity,
    UnitPrice,
    TotalPrice,
    PaidDate,
    Status,
    Notes,
    Category,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 13] = [
        CanonicalField::Vendor,
        CanonicalField::InvoiceNumber,
        CanonicalField::TransactionId,
        CanonicalField::InvoiceDate,
        CanonicalField::ServiceMonth,
        CanonicalField::Description,
        CanonicalField::Quantity,
        CanonicalField::UnitPrice,
        CanonicalField::TotalPrice,
        CanonicalField::PaidDate,
        CanonicalField::Status,
        CanonicalField::Notes,
        CanonicalField::Category,
    ];

    /// 分类器返回的字段名 (camelCase 或 snake_case)
    pub fn parse(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Some(match key.as_str() {
            "vendor" => Self::Vendor,
            "invoicenumber" => Self::InvoiceNumber,
            "transactionid" => Self::TransactionId,
            "invoicedate" => Self::InvoiceDate,
            "servicemonth" => Self::ServiceMonth,
            "description" => Self::Description,
            "quantity" => Self::Quantity,
            "unitprice" => Self::UnitPrice,
            "totalprice" => Self::TotalPrice,
            "paiddate" => Self::PaidDate,
            "status" => Self::Status,
            "notes" => Self::Notes,
            "category" => Self::Category,
            _ => return None,
        })
    }
}

/// 每个标准字段 -> 源列名 (或未映射)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub vendor: Option<String>,
    pub invoice_number: Option<String>,
    pub transaction_id: Option<String>,
    pub invoice_date: Option<String>,
    pub service_month: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<String>,
    pub unit_price: Option<String>,
    pub total_price: Option<String>,
    pub paid_date: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub category: Option<String>,
}

impl ColumnMapping {
    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.slot(field).as_deref()
    }

    pub fn set(&mut self, field: CanonicalField, column: Option<String>) {
        *self.slot_mut(field) = column;
    }

    pub fn is_mapped(&self, field: CanonicalField) -> bool {
        self.slot(field).is_some()
    }

    fn slot(&self, field: CanonicalField) -> &Option<String> {
        match field {
            CanonicalField::Vendor => &self.vendor,
            CanonicalField::InvoiceNumber => &self.invoice_number,
            CanonicalField::TransactionId => &self.transaction_id,
            CanonicalField::InvoiceDate => &self.invoice_date,
            CanonicalField::ServiceMonth => &self.service_month,
            CanonicalField::Description => &self.description,
            CanonicalField::Quantity => &self.quantity,
            CanonicalField::UnitPrice => &self.unit_price,
            CanonicalField::TotalPrice => &self.total_price,
            CanonicalField::PaidDate => &self.paid_date,
            CanonicalField::Status => &self.status,
            CanonicalField::Notes => &self.notes,
            CanonicalField::Category => &self.category,
        }
    }

    fn slot_mut(&mut self, field: CanonicalField) -> &mut Option<String> {
        match field {
            CanonicalField::Vendor => &mut self.vendor,
            CanonicalField::InvoiceNumber => &mut self.invoice_number,
            CanonicalField::TransactionId => &mut self.transaction_id,
            CanonicalField::InvoiceDate => &mut self.invoice_date,
            CanonicalField::ServiceMonth => &mut self.service_month,
            CanonicalField::Description => &mut self.description,
            CanonicalField::Quantity => &mut self.quantity,
            CanonicalField::UnitPrice => &mut self.unit_price,
            CanonicalField::TotalPrice => &mut self.total_price,
            CanonicalField::PaidDate => &mut self.paid_date,
            CanonicalField::Status => &mut self.status,
            CanonicalField::Notes => &mut self.notes,
            CanonicalField::Category => &mut self.category,
        }
    }
}

/// 源文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvFormatType {
    Invoice,
    Transaction,
    Unknown,
}

/// 声明式转换规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformRuleKind {
    /// 负金额取绝对值
    AbsoluteValue,
    /// 无发票号/交易号时合成发票号
    GenerateInvoiceNumber,
    /// 服务月份缺失时由发票日期推导
    DeriveServiceMonth,
}

impl TransformRuleKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "absolute_value" | "abs" | "absolute" => Some(Self::AbsoluteValue),
            "generate_invoice_number" | "synthesize_invoice_number" => Some(Self::GenerateInvoiceNumber),
            "derive_service_month" | "service_month_from_date" => Some(Self::DeriveServiceMonth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRule {
    pub field: CanonicalField,
    pub rule: TransformRuleKind,
    pub description: String,
}

/// 列映射结果 (分类器或启发式)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingResult {
    pub format_type: CsvFormatType,
    pub confidence: f64,
    pub mapping: ColumnMapping,
    pub transform_rules: Vec<TransformRule>,
    pub reasoning: String,
}

impl MappingResult {
    pub fn has_rule(&self, rule: TransformRuleKind) -> bool {
        self.transform_rules.iter().any(|r| r.rule == rule)
    }
}
