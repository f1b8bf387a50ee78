use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use super::ledger::Ledger;
use crate::error::LedgerError;
use crate::models::{
    Invoice, InvoiceHeader, InvoiceLineItem, NewInvoice, NewLineItem, NewService, Service,
    ServiceUpdate, Subscription, Vendor,
};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    vendors: Vec<Vendor>,
    subscriptions: Vec<Subscription>,
    invoices: Vec<Invoice>,
    services: Vec<Service>,
    line_items: Vec<InvoiceLineItem>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn apply_header(&mut self, invoice_id: i64, header: &InvoiceHeader) -> Result<(), LedgerError> {
        let invoice = self
            .invoices
            .iter_mut()
            .find(|i| i.id == invoice_id)
            .ok_or_else(|| LedgerError::NotFound { entity: "invoice", id: invoice_id.to_string() })?;
        invoice.vendor_id = header.vendor_id;
        invoice.subscription_id = header.subscription_id;
        invoice.invoice_date = header.invoice_date;
        invoice.total_amount = header.total_amount.clone();
        invoice.paid_date = header.paid_date;
        invoice.status = header.status.as_str().to_string();
        Ok(())
    }

    /// 明细外键校验: invoice_id / service_id 必须存在
    fn check_line_items(&self, items: &[NewLineItem]) -> Result<(), LedgerError> {
        for item in items {
            if !self.invoices.iter().any(|i| i.id == item.invoice_id) {
                return Err(constraint(format!("line item references missing invoice {}", item.invoice_id)));
            }
            if let Some(sid) = item.service_id {
                if !self.services.iter().any(|s| s.id == sid) {
                    return Err(constraint(format!("line item references missing service {sid}")));
                }
            }
        }
        Ok(())
    }

    fn push_line_items(&mut self, items: &[NewLineItem]) {
        for item in items {
            let id = self.next_id();
            self.line_items.push(InvoiceLineItem {
                id,
                invoice_id: item.invoice_id,
                service_id: item.service_id,
                description: item.description.clone(),
                service_month: item.service_month.clone(),
                quantity: item.quantity.clone(),
                unit_price: item.unit_price.clone(),
                total_amount: item.total_amount.clone(),
                period_start: item.period_start,
                period_end: item.period_end,
            });
        }
    }
}

/// 进程内账本, 用于测试与试运行
///
/// 与 Postgres 实现一样校验外键, 违反时返回 `LedgerError::Constraint`;
/// 多步写入 (`replace_invoice_line_items`) 先校验后修改, 失败不留中间状态。
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn vendors(&self) -> Vec<Vendor> {
        self.state().vendors.clone()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state().subscriptions.clone()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.state().invoices.clone()
    }

    pub fn services(&self) -> Vec<Service> {
        self.state().services.clone()
    }

    pub fn line_items(&self) -> Vec<InvoiceLineItem> {
        self.state().line_items.clone()
    }

    /// 没有悬空的明细: invoice_id / service_id 都指向存在的行
    pub fn orphaned_line_items(&self) -> Vec<InvoiceLineItem> {
        let state = self.state();
        state
            .line_items
            .iter()
            .filter(|li| {
                let invoice_missing = !state.invoices.iter().any(|i| i.id == li.invoice_id);
                let service_missing = li
                    .service_id
                    .map(|sid| !state.services.iter().any(|s| s.id == sid))
                    .unwrap_or(false);
                invoice_missing || service_missing
            })
            .cloned()
            .collect()
    }
}

fn constraint(message: impl Into<String>) -> LedgerError {
    LedgerError::Constraint(message.into())
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn find_vendor_by_name(&self, name: &str) -> Result<Option<Vendor>, LedgerError> {
        let needle = name.trim().to_lowercase();
        Ok(self.state().vendors.iter().find(|v| v.name.to_lowercase() == needle).cloned())
    }

    async fn find_vendor_by_id(&self, id: i64) -> Result<Option<Vendor>, LedgerError> {
        Ok(self.state().vendors.iter().find(|v| v.id == id).cloned())
    }

    async fn create_vendor(&self, name: &str) -> Result<Vendor, LedgerError> {
        let mut state = self.state();
        let vendor = Vendor {
            id: state.next_id(),
            name: name.trim().to_string(),
            created_at: Utc::now(),
        };
        state.vendors.push(vendor.clone());
        Ok(vendor)
    }

    async fn find_latest_subscription_by_vendor(
        &self,
        vendor_id: i64,
    ) -> Result<Option<Subscription>, LedgerError> {
        Ok(self
            .state()
            .subscriptions
            .iter()
            .filter(|s| s.vendor_id == vendor_id)
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    async fn create_subscription(&self, vendor_id: i64, name: &str) -> Result<Subscription, LedgerError> {
        let mut state = self.state();
        if !state.vendors.iter().any(|v| v.id == vendor_id) {
            return Err(constraint(format!("subscription references missing vendor {vendor_id}")));
        }
        let subscription = Subscription {
            id: state.next_id(),
            vendor_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn list_subscription_ids_by_vendor(&self, vendor_id: i64) -> Result<Vec<i64>, LedgerError> {
        Ok(self
            .state()
            .subscriptions
            .iter()
            .filter(|s| s.vendor_id == vendor_id)
            .map(|s| s.id)
            .collect())
    }

    async fn find_invoice_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>, LedgerError> {
        Ok(self
            .state()
            .invoices
            .iter()
            .find(|i| i.invoice_number == invoice_number)
            .cloned())
    }

    async fn create_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, LedgerError> {
        let mut state = self.state();
        if state.invoices.iter().any(|i| i.invoice_number == invoice.invoice_number) {
            return Err(constraint(format!("duplicate invoice number {}", invoice.invoice_number)));
        }
        let h = &invoice.header;
        if !state.subscriptions.iter().any(|s| s.id == h.subscription_id) {
            return Err(constraint(format!("invoice references missing subscription {}", h.subscription_id)));
        }
        let created = Invoice {
            id: state.next_id(),
            vendor_id: h.vendor_id,
            subscription_id: h.subscription_id,
            invoice_number: invoice.invoice_number.clone(),
            invoice_date: h.invoice_date,
            total_amount: h.total_amount.clone(),
            paid_date: h.paid_date,
            status: h.status.as_str().to_string(),
            created_at: Utc::now(),
        };
        state.invoices.push(created.clone());
        Ok(created)
    }

    async fn update_invoice(&self, invoice_id: i64, header: &InvoiceHeader) -> Result<(), LedgerError> {
        self.state().apply_header(invoice_id, header)
    }

    async fn list_invoice_line_items(&self, invoice_id: i64) -> Result<Vec<InvoiceLineItem>, LedgerError> {
        Ok(self
            .state()
            .line_items
            .iter()
            .filter(|li| li.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn delete_invoice_line_items(&self, invoice_id: i64) -> Result<u64, LedgerError> {
        let mut state = self.state();
        let before = state.line_items.len();
        state.line_items.retain(|li| li.invoice_id != invoice_id);
        Ok((before - state.line_items.len()) as u64)
    }

    async fn add_line_items(&self, items: &[NewLineItem]) -> Result<u64, LedgerError> {
        let mut state = self.state();
        state.check_line_items(items)?;
        state.push_line_items(items);
        Ok(items.len() as u64)
    }

    async fn replace_invoice_line_items(
        &self,
        invoice_id: i64,
        header: &InvoiceHeader,
        items: &[NewLineItem],
    ) -> Result<u64, LedgerError> {
        let mut state = self.state();
        // 先校验全部约束, 再一次性修改: 失败时账本保持原样
        if !state.invoices.iter().any(|i| i.id == invoice_id) {
            return Err(LedgerError::NotFound { entity: "invoice", id: invoice_id.to_string() });
        }
        if !state.subscriptions.iter().any(|s| s.id == header.subscription_id) {
            return Err(constraint(format!(
                "invoice references missing subscription {}",
                header.subscription_id
            )));
        }
        state.check_line_items(items)?;

        state.apply_header(invoice_id, header)?;
        let before = state.line_items.len();
        state.line_items.retain(|li| li.invoice_id != invoice_id);
        let deleted = (before - state.line_items.len()) as u64;
        state.push_line_items(items);
        Ok(deleted)
    }

    async fn list_services_by_subscription(&self, subscription_id: i64) -> Result<Vec<Service>, LedgerError> {
        Ok(self
            .state()
            .services
            .iter()
            .filter(|s| s.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn find_service_by_id(&self, id: i64) -> Result<Option<Service>, LedgerError> {
        Ok(self.state().services.iter().find(|s| s.id == id).cloned())
    }

    async fn create_service(&self, service: &NewService) -> Result<Service, LedgerError> {
        let mut state = self.state();
        if !state.subscriptions.iter().any(|s| s.id == service.subscription_id) {
            return Err(constraint(format!(
                "service references missing subscription {}",
                service.subscription_id
            )));
        }
        let created = Service {
            id: state.next_id(),
            subscription_id: service.subscription_id,
            name: service.name.clone(),
            quantity: service.quantity.clone(),
            unit_price: service.unit_price.clone(),
            amount: service.amount.clone(),
            last_invoice_date: service.last_invoice_date,
        };
        state.services.push(created.clone());
        Ok(created)
    }

    async fn update_service(&self, id: i64, update: &ServiceUpdate) -> Result<(), LedgerError> {
        let mut state = self.state();
        let service = state
            .services
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| LedgerError::NotFound { entity: "service", id: id.to_string() })?;
        service.quantity = update.quantity.clone();
        service.unit_price = update.unit_price.clone();
        service.amount = update.amount.clone();
        service.last_invoice_date = update.last_invoice_date;
        Ok(())
    }

    async fn reassign_invoices_to_vendor(
        &self,
        source_vendor_id: i64,
        target_vendor_id: i64,
        target_subscription_id: i64,
    ) -> Result<u64, LedgerError> {
        let mut state = self.state();
        let mut moved = 0;
        for invoice in state.invoices.iter_mut().filter(|i| i.vendor_id == source_vendor_id) {
            invoice.vendor_id = target_vendor_id;
            invoice.subscription_id = target_subscription_id;
            moved += 1;
        }
        Ok(moved)
    }

    async fn reassign_services_to_subscription(
        &self,
        source_subscription_ids: &[i64],
        target_subscription_id: i64,
    ) -> Result<u64, LedgerError> {
        let mut state = self.state();
        let mut moved = 0;
        for service in state
            .services
            .iter_mut()
            .filter(|s| source_subscription_ids.contains(&s.subscription_id))
        {
            service.subscription_id = target_subscription_id;
            moved += 1;
        }
        Ok(moved)
    }

    async fn delete_subscriptions_by_ids(&self, ids: &[i64]) -> Result<u64, LedgerError> {
        let mut state = self.state();
        let referenced = state.invoices.iter().any(|i| ids.contains(&i.subscription_id))
            || state.services.iter().any(|s| ids.contains(&s.subscription_id));
        if referenced {
            return Err(constraint("subscription still referenced"));
        }
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| !ids.contains(&s.id));
        Ok((before - state.subscriptions.len()) as u64)
    }

    async fn delete_vendor(&self, id: i64) -> Result<u64, LedgerError> {
        let mut state = self.state();
        let referenced = state.invoices.iter().any(|i| i.vendor_id == id)
            || state.subscriptions.iter().any(|s| s.vendor_id == id);
        if referenced {
            return Err(constraint(format!("vendor {id} still referenced")));
        }
        let before = state.vendors.len();
        state.vendors.retain(|v| v.id != id);
        Ok((before - state.vendors.len()) as u64)
    }

    async fn reassign_line_items_to_service(
        &self,
        source_service_id: i64,
        target_service_id: i64,
    ) -> Result<u64, LedgerError> {
        let mut state = self.state();
        let mut moved = 0;
        for item in state
            .line_items
            .iter_mut()
            .filter(|li| li.service_id == Some(source_service_id))
        {
            item.service_id = Some(target_service_id);
            moved += 1;
        }
        Ok(moved)
    }

    async fn delete_service(&self, id: i64) -> Result<u64, LedgerError> {
        let mut state = self.state();
        if state.line_items.iter().any(|li| li.service_id == Some(id)) {
            return Err(constraint(format!("service {id} still referenced")));
        }
        let before = state.services.len();
        state.services.retain(|s| s.id != id);
        Ok((before - state.services.len()) as u64)
    }

    async fn count_invoices_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError> {
        Ok(self.state().invoices.iter().filter(|i| i.vendor_id == vendor_id).count() as i64)
    }

    async fn count_subscriptions_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError> {
        Ok(self.state().subscriptions.iter().filter(|s| s.vendor_id == vendor_id).count() as i64)
    }

    async fn count_services_by_subscriptions(&self, subscription_ids: &[i64]) -> Result<i64, LedgerError> {
        Ok(self
            .state()
            .services
            .iter()
            .filter(|s| subscription_ids.contains(&s.subscription_id))
            .count() as i64)
    }

    async fn count_line_items_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError> {
        let state = self.state();
        let invoice_ids: HashSet<i64> = state
            .invoices
            .iter()
            .filter(|i| i.vendor_id == vendor_id)
            .map(|i| i.id)
            .collect();
        Ok(state.line_items.iter().filter(|li| invoice_ids.contains(&li.invoice_id)).count() as i64)
    }

    async fn count_line_items_by_service(&self, service_id: i64) -> Result<i64, LedgerError> {
        Ok(self
            .state()
            .line_items
            .iter()
            .filter(|li| li.service_id == Some(service_id))
            .count() as i64)
    }
}
