#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use billing_import_rust::models::{
    Invoice, InvoiceHeader, InvoiceLineItem, NewInvoice, NewLineItem, NewService, Service,
    ServiceUpdate, StandardLineItem, Subscription, Vendor,
};
use billing_import_rust::{Ledger, LedgerError, MemoryLedger, SharedLedger};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

pub fn d(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn date(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn item(vendor: &str, invoice: &str, description: &str, total: &str) -> StandardLineItem {
    StandardLineItem {
        vendor: vendor.to_string(),
        invoice_number: invoice.to_string(),
        invoice_date: Some(date(2025, 4, 1)),
        service_month: "April".to_string(),
        description: description.to_string(),
        quantity: BigDecimal::from(1),
        unit_price: d(total),
        total_price: d(total),
        paid_date: None,
        is_voided: false,
        period_start: None,
        period_end: None,
        notes: None,
        category: None,
        transaction_id: None,
    }
}

pub fn dated(mut line: StandardLineItem, invoice_date: NaiveDate) -> StandardLineItem {
    line.invoice_date = Some(invoice_date);
    line
}

pub fn voided(mut line: StandardLineItem) -> StandardLineItem {
    line.is_voided = true;
    line
}

/// 两个供应商, 三张发票, 四条明细
pub fn sample_rows() -> Vec<StandardLineItem> {
    vec![
        item("Acme Inc", "INV-1", "Widget Support", "100.00"),
        item("Acme Inc", "INV-1", "Hosting", "40.00"),
        item("acme inc", "INV-2", "Widget Support", "100.00"),
        item("Globex", "INV-9", "Consulting Hours", "250.00"),
    ]
}

pub fn memory_ledger() -> (Arc<MemoryLedger>, SharedLedger) {
    let memory = Arc::new(MemoryLedger::new());
    let shared: SharedLedger = memory.clone();
    (memory, shared)
}

#[derive(Debug, Default)]
struct Faults {
    rejected_invoices: HashSet<String>,
    dangling_line_items: bool,
    ignore_line_item_reassignments: bool,
}

/// 包装 `MemoryLedger` 并按需注入故障的账本
pub struct FaultyLedger {
    inner: Arc<MemoryLedger>,
    faults: Mutex<Faults>,
}

impl FaultyLedger {
    pub fn new(inner: Arc<MemoryLedger>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    /// 该发票号的创建与改写一律失败
    pub fn reject_invoice(&self, invoice_number: &str) {
        self.faults.lock().unwrap().rejected_invoices.insert(invoice_number.to_string());
    }

    /// 写入的明细带上不存在的 service_id, 由内层账本在插入时拒绝
    pub fn dangling_line_items(&self, enabled: bool) {
        self.faults.lock().unwrap().dangling_line_items = enabled;
    }

    /// 模拟并发写入者: 明细改挂服务报告成功但不生效
    pub fn ignore_line_item_reassignments(&self, enabled: bool) {
        self.faults.lock().unwrap().ignore_line_item_reassignments = enabled;
    }

    fn check_invoice_number(&self, invoice_number: &str) -> Result<(), LedgerError> {
        if self.faults.lock().unwrap().rejected_invoices.contains(invoice_number) {
            return Err(LedgerError::Constraint(format!("invoice {invoice_number} rejected")));
        }
        Ok(())
    }

    fn check_invoice_id(&self, invoice_id: i64) -> Result<(), LedgerError> {
        match self.inner.invoices().into_iter().find(|i| i.id == invoice_id) {
            Some(invoice) => self.check_invoice_number(&invoice.invoice_number),
            None => Ok(()),
        }
    }

    fn line_items(&self, items: &[NewLineItem]) -> Vec<NewLineItem> {
        let dangling = self.faults.lock().unwrap().dangling_line_items;
        items
            .iter()
            .cloned()
            .map(|mut li| {
                if dangling {
                    li.service_id = Some(i64::MAX);
                }
                li
            })
            .collect()
    }
}

#[async_trait]
impl Ledger for FaultyLedger {
    async fn find_vendor_by_name(&self, name: &str) -> Result<Option<Vendor>, LedgerError> {
        self.inner.find_vendor_by_name(name).await
    }
    async fn find_vendor_by_id(&self, id: i64) -> Result<Option<Vendor>, LedgerError> {
        self.inner.find_vendor_by_id(id).await
    }
    async fn create_vendor(&self, name: &str) -> Result<Vendor, LedgerError> {
        self.inner.create_vendor(name).await
    }
    async fn find_latest_subscription_by_vendor(&self, vendor_id: i64) -> Result<Option<Subscription>, LedgerError> {
        self.inner.find_latest_subscription_by_vendor(vendor_id).await
    }
    async fn create_subscription(&self, vendor_id: i64, name: &str) -> Result<Subscription, LedgerError> {
        self.inner.create_subscription(vendor_id, name).await
    }
    async fn list_subscription_ids_by_vendor(&self, vendor_id: i64) -> Result<Vec<i64>, LedgerError> {
        self.inner.list_subscription_ids_by_vendor(vendor_id).await
    }
    async fn find_invoice_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>, LedgerError> {
        self.inner.find_invoice_by_number(invoice_number).await
    }
    async fn create_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, LedgerError> {
        self.check_invoice_number(&invoice.invoice_number)?;
        self.inner.create_invoice(invoice).await
    }
    async fn update_invoice(&self, invoice_id: i64, header: &InvoiceHeader) -> Result<(), LedgerError> {
        self.check_invoice_id(invoice_id)?;
        self.inner.update_invoice(invoice_id, header).await
    }
    async fn list_invoice_line_items(&self, invoice_id: i64) -> Result<Vec<InvoiceLineItem>, LedgerError> {
        self.inner.list_invoice_line_items(invoice_id).await
    }
    async fn delete_invoice_line_items(&self, invoice_id: i64) -> Result<u64, LedgerError> {
        self.inner.delete_invoice_line_items(invoice_id).await
    }
    async fn add_line_items(&self, items: &[NewLineItem]) -> Result<u64, LedgerError> {
        self.inner.add_line_items(&self.line_items(items)).await
    }
    async fn replace_invoice_line_items(
        &self,
        invoice_id: i64,
        header: &InvoiceHeader,
        items: &[NewLineItem],
    ) -> Result<u64, LedgerError> {
        self.check_invoice_id(invoice_id)?;
        self.inner
            .replace_invoice_line_items(invoice_id, header, &self.line_items(items))
            .await
    }
    async fn list_services_by_subscription(&self, subscription_id: i64) -> Result<Vec<Service>, LedgerError> {
        self.inner.list_services_by_subscription(subscription_id).await
    }
    async fn find_service_by_id(&self, id: i64) -> Result<Option<Service>, LedgerError> {
        self.inner.find_service_by_id(id).await
    }
    async fn create_service(&self, service: &NewService) -> Result<Service, LedgerError> {
        self.inner.create_service(service).await
    }
    async fn update_service(&self, id: i64, update: &ServiceUpdate) -> Result<(), LedgerError> {
        self.inner.update_service(id, update).await
    }
    async fn reassign_invoices_to_vendor(
        &self,
        source_vendor_id: i64,
        target_vendor_id: i64,
        target_subscription_id: i64,
    ) -> Result<u64, LedgerError> {
        self.inner
            .reassign_invoices_to_vendor(source_vendor_id, target_vendor_id, target_subscription_id)
            .await
    }
    async fn reassign_services_to_subscription(
        &self,
        source_subscription_ids: &[i64],
        target_subscription_id: i64,
    ) -> Result<u64, LedgerError> {
        self.inner
            .reassign_services_to_subscription(source_subscription_ids, target_subscription_id)
            .await
    }
    async fn delete_subscriptions_by_ids(&self, ids: &[i64]) -> Result<u64, LedgerError> {
        self.inner.delete_subscriptions_by_ids(ids).await
    }
    async fn delete_vendor(&self, id: i64) -> Result<u64, LedgerError> {
        self.inner.delete_vendor(id).await
    }
    async fn reassign_line_items_to_service(
        &self,
        source_service_id: i64,
        target_service_id: i64,
    ) -> Result<u64, LedgerError> {
        let ignore = self.faults.lock().unwrap().ignore_line_item_reassignments;
        if ignore {
            let pending = self.inner.count_line_items_by_service(source_service_id).await?;
            return Ok(pending as u64);
        }
        self.inner
            .reassign_line_items_to_service(source_service_id, target_service_id)
            .await
    }
    async fn delete_service(&self, id: i64) -> Result<u64, LedgerError> {
        self.inner.delete_service(id).await
    }
    async fn count_invoices_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError> {
        self.inner.count_invoices_by_vendor(vendor_id).await
    }
    async fn count_subscriptions_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError> {
        self.inner.count_subscriptions_by_vendor(vendor_id).await
    }
    async fn count_services_by_subscriptions(&self, subscription_ids: &[i64]) -> Result<i64, LedgerError> {
        self.inner.count_services_by_subscriptions(subscription_ids).await
    }
    async fn count_line_items_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError> {
        self.inner.count_line_items_by_vendor(vendor_id).await
    }
    async fn count_line_items_by_service(&self, service_id: i64) -> Result<i64, LedgerError> {
        self.inner.count_line_items_by_service(service_id).await
    }
}

/// (内层账本, 故障包装, 共享句柄)
pub fn faulty_ledger() -> (Arc<MemoryLedger>, Arc<FaultyLedger>, SharedLedger) {
    let memory = Arc::new(MemoryLedger::new());
    let faulty = Arc::new(FaultyLedger::new(memory.clone()));
    let shared: SharedLedger = faulty.clone();
    (memory, faulty, shared)
}

pub const LEGACY_CSV: &str = "\
Vendor,Invoice,Invoice Date,Line Item,QTY, Unit Price , Total Price ,Paid Date
Acme Inc,INV-100,4/1/25,Widget Support 4/1/25-4/30/25,2,50.00,100.00,4/10/25
Acme Inc,INV-100,4/1/25,Hosting,1,40.00,40.00,4/10/25
Globex,INV-200,4/3/25,Consulting Hours,5,50.00,250.00,
Globex,INV-200,4/3/25,Rounding,1,0.00,0.00,
";
