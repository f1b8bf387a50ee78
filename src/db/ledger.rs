use async_trait::async_trait;
use std::sync::Arc;

use crate::error::LedgerError;
use crate::models::{
    Invoice, InvoiceHeader, InvoiceLineItem, NewInvoice, NewLineItem, NewService, Service,
    ServiceUpdate, ServiceUpsert, Subscription, UpsertOutcome, Vendor,
};
use crate::service::matching::{find_service_match, service_update_allowed};

pub type SharedLedger = Arc<dyn Ledger>;

/// 账本接口 (外部存储)
///
/// 导入与合并只依赖这组操作; 每次调用都重新查询, 不跨批缓存实体。
#[async_trait]
pub trait Ledger: Send + Sync {
    /// 按名称查找供应商 (大小写不敏感)
    async fn find_vendor_by_name(&self, name: &str) -> Result<Option<Vendor>, LedgerError>;
    async fn find_vendor_by_id(&self, id: i64) -> Result<Option<Vendor>, LedgerError>;
    async fn create_vendor(&self, name: &str) -> Result<Vendor, LedgerError>;

    async fn find_latest_subscription_by_vendor(
        &self,
        vendor_id: i64,
    ) -> Result<Option<Subscription>, LedgerError>;
    async fn create_subscription(&self, vendor_id: i64, name: &str) -> Result<Subscription, LedgerError>;
    async fn list_subscription_ids_by_vendor(&self, vendor_id: i64) -> Result<Vec<i64>, LedgerError>;

    /// 按发票号查找 (发票号全局唯一)
    async fn find_invoice_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>, LedgerError>;
    async fn create_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, LedgerError>;
    async fn update_invoice(&self, invoice_id: i64, header: &InvoiceHeader) -> Result<(), LedgerError>;
    async fn list_invoice_line_items(&self, invoice_id: i64) -> Result<Vec<InvoiceLineItem>, LedgerError>;
    async fn delete_invoice_line_items(&self, invoice_id: i64) -> Result<u64, LedgerError>;
    async fn add_line_items(&self, items: &[NewLineItem]) -> Result<u64, LedgerError>;
    /// 整体替换发票: 更新表头, 删除旧明细, 写入新明细
    ///
    /// 三步要么全部生效要么全部不生效; 返回删除的旧明细数。
    async fn replace_invoice_line_items(
        &self,
        invoice_id: i64,
        header: &InvoiceHeader,
        items: &[NewLineItem],
    ) -> Result<u64, LedgerError>;

    async fn list_services_by_subscription(&self, subscription_id: i64) -> Result<Vec<Service>, LedgerError>;
    async fn find_service_by_id(&self, id: i64) -> Result<Option<Service>, LedgerError>;
    async fn create_service(&self, service: &NewService) -> Result<Service, LedgerError>;
    async fn update_service(&self, id: i64, update: &ServiceUpdate) -> Result<(), LedgerError>;

    async fn reassign_invoices_to_vendor(
        &self,
        source_vendor_id: i64,
        target_vendor_id: i64,
        target_subscription_id: i64,
    ) -> Result<u64, LedgerError>;
    async fn reassign_services_to_subscription(
        &self,
        source_subscription_ids: &[i64],
        target_subscription_id: i64,
    ) -> Result<u64, LedgerError>;
    /// 同时删除订阅的分配记录
    async fn delete_subscriptions_by_ids(&self, ids: &[i64]) -> Result<u64, LedgerError>;
    async fn delete_vendor(&self, id: i64) -> Result<u64, LedgerError>;
    async fn reassign_line_items_to_service(
        &self,
        source_service_id: i64,
        target_service_id: i64,
    ) -> Result<u64, LedgerError>;
    async fn delete_service(&self, id: i64) -> Result<u64, LedgerError>;

    async fn count_invoices_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError>;
    async fn count_subscriptions_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError>;
    async fn count_services_by_subscriptions(&self, subscription_ids: &[i64]) -> Result<i64, LedgerError>;
    async fn count_line_items_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError>;
    async fn count_line_items_by_service(&self, service_id: i64) -> Result<i64, LedgerError>;

    /// 订阅范围内按模糊名称新建或更新服务, 按发票日期做最后写入者胜出
    async fn upsert_service(
        &self,
        subscription_id: i64,
        upsert: &ServiceUpsert,
    ) -> Result<(i64, UpsertOutcome), LedgerError> {
        let candidates = self.list_services_by_subscription(subscription_id).await?;

        if let Some(existing) = find_service_match(&upsert.name, &candidates) {
            if !service_update_allowed(upsert.invoice_date, existing.last_invoice_date) {
                tracing::debug!(
                    "Service '{}' not updated: invoice date {:?} older than {:?}",
                    existing.name, upsert.invoice_date, existing.last_invoice_date
                );
                return Ok((existing.id, UpsertOutcome::Stale));
            }
            let update = ServiceUpdate {
                quantity: upsert.quantity.clone(),
                unit_price: upsert.unit_price.clone(),
                amount: upsert.amount.clone(),
                last_invoice_date: upsert.invoice_date.or(existing.last_invoice_date),
            };
            self.update_service(existing.id, &update).await?;
            return Ok((existing.id, UpsertOutcome::Updated));
        }

        let created = self
            .create_service(&NewService {
                subscription_id,
                name: upsert.name.clone(),
                quantity: upsert.quantity.clone(),
                unit_price: upsert.unit_price.clone(),
                amount: upsert.amount.clone(),
                last_invoice_date: upsert.invoice_date,
            })
            .await?;
        Ok((created.id, UpsertOutcome::Created))
    }
}
