use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 供应商 (名称大小写不敏感唯一)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Vendor {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// 订阅 (每个供应商一条懒创建的主协议)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub vendor_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Paid,
    Unpaid,
    /// 作废/待处理发票按未付导入
    Pending,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Pending => "pending",
        }
    }
}

/// 发票 (发票号全局唯一)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub vendor_id: i64,
    pub subscription_id: i64,
    pub invoice_number: String,
    pub invoice_date: Option<NaiveDate>,
    pub total_amount: BigDecimal,
    pub paid_date: Option<NaiveDate>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn is_voided(&self) -> bool {
        self.status == InvoiceStatus::Pending.as_str()
    }
}

/// 发票头字段 (新建与更新共用)
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceHeader {
    pub vendor_id: i64,
    pub subscription_id: i64,
    pub invoice_date: Option<NaiveDate>,
    pub total_amount: BigDecimal,
    pub paid_date: Option<NaiveDate>,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub header: InvoiceHeader,
}

/// 服务目录条目 (订阅范围内按名称模糊匹配)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub subscription_id: i64,
    pub name: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub amount: BigDecimal,
    /// 最近一次更新所依据的发票日期
    pub last_invoice_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewService {
    pub subscription_id: i64,
    pub name: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub amount: BigDecimal,
    pub last_invoice_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUpdate {
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub amount: BigDecimal,
    pub last_invoice_date: Option<NaiveDate>,
}

/// 一张发票内同名描述聚合后的服务数据
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUpsert {
    pub name: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub amount: BigDecimal,
    pub invoice_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// 发票日期早于服务最近更新, 不覆盖
    Stale,
}

/// 发票明细
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub id: i64,
    pub invoice_id: i64,
    pub service_id: Option<i64>,
    pub description: String,
    pub service_month: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub invoice_id: i64,
    pub service_id: Option<i64>,
    pub description: String,
    pub service_month: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}
