use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use super::ledger::Ledger;
use crate::error::LedgerError;
use crate::models::{
    Invoice, InvoiceHeader, InvoiceLineItem, NewInvoice, NewLineItem, NewService, Service,
    ServiceUpdate, Subscription, Vendor,
};

const INVOICE_COLUMNS: &str =
    "id, vendor_id, subscription_id, invoice_number, invoice_date, total_amount, paid_date, status, created_at";
const SERVICE_COLUMNS: &str =
    "id, subscription_id, name, quantity, unit_price, amount, last_invoice_date";
const LINE_ITEM_COLUMNS: &str =
    "id, invoice_id, service_id, description, service_month, quantity, unit_price, total_amount, period_start, period_end";

/// Postgres 账本实现
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// 唯一约束冲突单独归类, 便于按发票报告
fn map_write_error(e: sqlx::Error) -> LedgerError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() || db_err.is_foreign_key_violation() => {
            LedgerError::Constraint(db_err.message().to_string())
        }
        other => LedgerError::Database(other),
    }
}

async fn update_invoice_header(
    conn: &mut PgConnection,
    invoice_id: i64,
    header: &InvoiceHeader,
) -> Result<(), LedgerError> {
    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET vendor_id = $2, subscription_id = $3, invoice_date = $4,
            total_amount = $5, paid_date = $6, status = $7
        WHERE id = $1
        "#,
    )
    .bind(invoice_id)
    .bind(header.vendor_id)
    .bind(header.subscription_id)
    .bind(header.invoice_date)
    .bind(&header.total_amount)
    .bind(header.paid_date)
    .bind(header.status.as_str())
    .execute(&mut *conn)
    .await
    .map_err(map_write_error)?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::NotFound { entity: "invoice", id: invoice_id.to_string() });
    }
    Ok(())
}

/// 分块批量插入明细 (每块 1000 行), 可在事务内调用
async fn insert_line_items(conn: &mut PgConnection, items: &[NewLineItem]) -> Result<u64, LedgerError> {
    let mut inserted = 0;
    for chunk in items.chunks(1000) {
        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO invoice_line_items (
                invoice_id, service_id, description, service_month,
                quantity, unit_price, total_amount, period_start, period_end
            ) ",
        );
        query_builder.push_values(chunk, |mut b, item| {
            b.push_bind(item.invoice_id)
                .push_bind(item.service_id)
                .push_bind(&item.description)
                .push_bind(&item.service_month)
                .push_bind(&item.quantity)
                .push_bind(&item.unit_price)
                .push_bind(&item.total_amount)
                .push_bind(item.period_start)
                .push_bind(item.period_end);
        });

        let result = query_builder
            .build()
            .execute(&mut *conn)
            .await
            .map_err(map_write_error)?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

#[async_trait]
impl Ledger for PgLedger {
    async fn find_vendor_by_name(&self, name: &str) -> Result<Option<Vendor>, LedgerError> {
        let vendor = sqlx::query_as::<_, Vendor>(
            r#"
            SELECT id, name, created_at
            FROM vendors
            WHERE lower(name) = lower($1)
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(vendor)
    }

    async fn find_vendor_by_id(&self, id: i64) -> Result<Option<Vendor>, LedgerError> {
        let vendor = sqlx::query_as::<_, Vendor>("SELECT id, name, created_at FROM vendors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(vendor)
    }

    async fn create_vendor(&self, name: &str) -> Result<Vendor, LedgerError> {
        sqlx::query_as::<_, Vendor>("INSERT INTO vendors (name) VALUES ($1) RETURNING id, name, created_at")
            .bind(name.trim())
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)
    }

    async fn find_latest_subscription_by_vendor(
        &self,
        vendor_id: i64,
    ) -> Result<Option<Subscription>, LedgerError> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, vendor_id, name, created_at
            FROM subscriptions
            WHERE vendor_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }

    async fn create_subscription(&self, vendor_id: i64, name: &str) -> Result<Subscription, LedgerError> {
        sqlx::query_as::<_, Subscription>(
            "INSERT INTO subscriptions (vendor_id, name) VALUES ($1, $2) RETURNING id, vendor_id, name, created_at",
        )
        .bind(vendor_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn list_subscription_ids_by_vendor(&self, vendor_id: i64) -> Result<Vec<i64>, LedgerError> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM subscriptions WHERE vendor_id = $1 ORDER BY id")
            .bind(vendor_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn find_invoice_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>, LedgerError> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_number = $1"
        ))
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invoice)
    }

    async fn create_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, LedgerError> {
        let h = &invoice.header;
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (vendor_id, subscription_id, invoice_number, invoice_date, total_amount, paid_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(h.vendor_id)
        .bind(h.subscription_id)
        .bind(&invoice.invoice_number)
        .bind(h.invoice_date)
        .bind(&h.total_amount)
        .bind(h.paid_date)
        .bind(h.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn update_invoice(&self, invoice_id: i64, header: &InvoiceHeader) -> Result<(), LedgerError> {
        let mut conn = self.pool.acquire().await?;
        update_invoice_header(&mut conn, invoice_id, header).await
    }

    async fn list_invoice_line_items(&self, invoice_id: i64) -> Result<Vec<InvoiceLineItem>, LedgerError> {
        let items = sqlx::query_as::<_, InvoiceLineItem>(&format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM invoice_line_items WHERE invoice_id = $1 ORDER BY id"
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn delete_invoice_line_items(&self, invoice_id: i64) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn add_line_items(&self, items: &[NewLineItem]) -> Result<u64, LedgerError> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.acquire().await?;
        let inserted = insert_line_items(&mut conn, items).await?;
        tracing::debug!("Inserted {} line items", inserted);
        Ok(inserted)
    }

    async fn replace_invoice_line_items(
        &self,
        invoice_id: i64,
        header: &InvoiceHeader,
        items: &[NewLineItem],
    ) -> Result<u64, LedgerError> {
        let mut tx = self.pool.begin().await?;

        update_invoice_header(&mut tx, invoice_id, header).await?;

        let deleted = sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let inserted = insert_line_items(&mut tx, items).await?;

        // 任一步出错时 tx 被丢弃即回滚
        tx.commit().await?;
        tracing::debug!(
            "Invoice {} line items replaced: -{} +{}",
            invoice_id, deleted, inserted
        );
        Ok(deleted)
    }

    async fn list_services_by_subscription(&self, subscription_id: i64) -> Result<Vec<Service>, LedgerError> {
        let services = sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE subscription_id = $1 ORDER BY id"
        ))
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(services)
    }

    async fn find_service_by_id(&self, id: i64) -> Result<Option<Service>, LedgerError> {
        let service = sqlx::query_as::<_, Service>(&format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(service)
    }

    async fn create_service(&self, service: &NewService) -> Result<Service, LedgerError> {
        sqlx::query_as::<_, Service>(&format!(
            r#"
            INSERT INTO services (subscription_id, name, quantity, unit_price, amount, last_invoice_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(service.subscription_id)
        .bind(&service.name)
        .bind(&service.quantity)
        .bind(&service.unit_price)
        .bind(&service.amount)
        .bind(service.last_invoice_date)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn update_service(&self, id: i64, update: &ServiceUpdate) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE services
            SET quantity = $2, unit_price = $3, amount = $4, last_invoice_date = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.quantity)
        .bind(&update.unit_price)
        .bind(&update.amount)
        .bind(update.last_invoice_date)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn reassign_invoices_to_vendor(
        &self,
        source_vendor_id: i64,
        target_vendor_id: i64,
        target_subscription_id: i64,
    ) -> Result<u64, LedgerError> {
        let result = sqlx::query("UPDATE invoices SET vendor_id = $2, subscription_id = $3 WHERE vendor_id = $1")
            .bind(source_vendor_id)
            .bind(target_vendor_id)
            .bind(target_subscription_id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(result.rows_affected())
    }

    async fn reassign_services_to_subscription(
        &self,
        source_subscription_ids: &[i64],
        target_subscription_id: i64,
    ) -> Result<u64, LedgerError> {
        if source_subscription_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE services SET subscription_id = $2 WHERE subscription_id = ANY($1)")
            .bind(source_subscription_ids)
            .bind(target_subscription_id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_subscriptions_by_ids(&self, ids: &[i64]) -> Result<u64, LedgerError> {
        if ids.is_empty() {
            return Ok(0);
        }
        sqlx::query("DELETE FROM subscription_assignments WHERE subscription_id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_vendor(&self, id: i64) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM vendors WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(result.rows_affected())
    }

    async fn reassign_line_items_to_service(
        &self,
        source_service_id: i64,
        target_service_id: i64,
    ) -> Result<u64, LedgerError> {
        let result = sqlx::query("UPDATE invoice_line_items SET service_id = $2 WHERE service_id = $1")
            .bind(source_service_id)
            .bind(target_service_id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_service(&self, id: i64) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM services WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(result.rows_affected())
    }

    async fn count_invoices_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM invoices WHERE vendor_id = $1")
            .bind(vendor_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_subscriptions_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM subscriptions WHERE vendor_id = $1")
            .bind(vendor_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_services_by_subscriptions(&self, subscription_ids: &[i64]) -> Result<i64, LedgerError> {
        if subscription_ids.is_empty() {
            return Ok(0);
        }
        let count = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM services WHERE subscription_id = ANY($1)")
            .bind(subscription_ids)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_line_items_by_vendor(&self, vendor_id: i64) -> Result<i64, LedgerError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count(*)
            FROM invoice_line_items li
            INNER JOIN invoices i ON i.id = li.invoice_id
            WHERE i.vendor_id = $1
            "#,
        )
        .bind(vendor_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_line_items_by_service(&self, service_id: i64) -> Result<i64, LedgerError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM invoice_line_items WHERE service_id = $1")
            .bind(service_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
