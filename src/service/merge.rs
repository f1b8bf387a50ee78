//! 供应商 / 服务合并
//!
//! 合并是一串独立语句, 每一步变更后回读计数校验; 任何校验失败立即停止,
//! 账本停留在最后完成的中间状态, 结果以 `success: false` 报告。

use crate::db::SharedLedger;
use crate::error::MergeError;
use crate::models::{MergeCounts, MergePreview, MergeResult};
use crate::service::executor::ensure_master_subscription;

/// 校验变更后的后置条件, 不满足则报告失败
pub fn ensure_postcondition(step: &'static str, expected: i64, actual: i64) -> Result<(), MergeError> {
    if expected == actual {
        tracing::debug!("校验通过: {} ({})", step, actual);
        return Ok(());
    }
    tracing::warn!("Verification failed after {}: expected {}, found {}", step, expected, actual);
    Err(MergeError::VerificationFailed { step, expected, actual })
}

fn finish(outcome: Result<(), MergeError>, moved: MergeCounts) -> MergeResult {
    match outcome {
        Ok(()) => MergeResult {
            success: true,
            moved,
            error: None,
        },
        Err(e) => {
            tracing::error!("Merge failed: {}", e);
            MergeResult {
                success: false,
                moved,
                error: Some(e.to_string()),
            }
        }
    }
}

pub struct MergeService {
    ledger: SharedLedger,
}

impl MergeService {
    pub fn new(ledger: SharedLedger) -> Self {
        Self { ledger }
    }

    async fn require_vendor(&self, id: i64) -> Result<(), MergeError> {
        match self.ledger.find_vendor_by_id(id).await? {
            Some(_) => Ok(()),
            None => Err(MergeError::NotFound { entity: "vendor", id }),
        }
    }

    async fn require_service(&self, id: i64) -> Result<(), MergeError> {
        match self.ledger.find_service_by_id(id).await? {
            Some(_) => Ok(()),
            None => Err(MergeError::NotFound { entity: "service", id }),
        }
    }

    /// 合并前预览源供应商名下的数据量
    pub async fn vendor_merge_preview(&self, source_vendor_id: i64) -> Result<MergePreview, MergeError> {
        self.require_vendor(source_vendor_id).await?;
        let ledger = self.ledger.as_ref();
        let subscription_ids = ledger.list_subscription_ids_by_vendor(source_vendor_id).await?;

        let (invoices, subscriptions, services, line_items) = futures::try_join!(
            ledger.count_invoices_by_vendor(source_vendor_id),
            ledger.count_subscriptions_by_vendor(source_vendor_id),
            ledger.count_services_by_subscriptions(&subscription_ids),
            ledger.count_line_items_by_vendor(source_vendor_id),
        )?;

        Ok(MergePreview {
            invoices,
            subscriptions,
            services,
            line_items,
        })
    }

    /// 把源供应商并入目标供应商
    ///
    /// 参数错误在任何变更之前以 `Err` 返回; 变更阶段的失败体现在 `MergeResult` 中。
    pub async fn merge_vendors(
        &self,
        source_vendor_id: i64,
        target_vendor_id: i64,
    ) -> Result<MergeResult, MergeError> {
        if source_vendor_id == target_vendor_id {
            return Err(MergeError::InvalidRequest("source and target vendor are the same".to_string()));
        }
        self.require_vendor(source_vendor_id).await?;
        self.require_vendor(target_vendor_id).await?;

        let mut moved = MergeCounts::default();
        let outcome = self
            .apply_vendor_merge(source_vendor_id, target_vendor_id, &mut moved)
            .await;
        if outcome.is_ok() {
            tracing::info!(
                "Vendor {} merged into {}: {} invoices, {} services, {} line items",
                source_vendor_id, target_vendor_id, moved.moved_invoices, moved.moved_services, moved.moved_line_items
            );
        }
        Ok(finish(outcome, moved))
    }

    async fn apply_vendor_merge(
        &self,
        source: i64,
        target: i64,
        moved: &mut MergeCounts,
    ) -> Result<(), MergeError> {
        let preview = self.vendor_merge_preview(source).await?;
        let ledger = self.ledger.as_ref();

        let target_line_items_before = ledger.count_line_items_by_vendor(target).await?;
        let (target_subscription, _) = ensure_master_subscription(ledger, target).await?;
        let source_subscription_ids = ledger.list_subscription_ids_by_vendor(source).await?;

        tracing::info!("合并供应商 {} -> {}: 迁移发票", source, target);
        moved.moved_invoices = ledger
            .reassign_invoices_to_vendor(source, target, target_subscription.id)
            .await? as i64;
        ensure_postcondition(
            "reassign invoices",
            0,
            ledger.count_invoices_by_vendor(source).await?,
        )?;

        tracing::info!("合并供应商 {} -> {}: 迁移服务", source, target);
        moved.moved_services = ledger
            .reassign_services_to_subscription(&source_subscription_ids, target_subscription.id)
            .await? as i64;
        ensure_postcondition(
            "reassign services",
            0,
            ledger.count_services_by_subscriptions(&source_subscription_ids).await?,
        )?;

        moved.deleted_subscriptions = ledger.delete_subscriptions_by_ids(&source_subscription_ids).await? as i64;
        ensure_postcondition(
            "delete subscriptions",
            0,
            ledger.count_subscriptions_by_vendor(source).await?,
        )?;

        ledger.delete_vendor(source).await?;
        let remaining = ledger.find_vendor_by_id(source).await?.is_some() as i64;
        ensure_postcondition("delete vendor", 0, remaining)?;

        // 明细随发票迁移, 目标增量必须等于预览数
        moved.moved_line_items = ledger.count_line_items_by_vendor(target).await? - target_line_items_before;
        ensure_postcondition("line item conservation", preview.line_items, moved.moved_line_items)?;
        Ok(())
    }

    pub async fn service_merge_preview(&self, source_service_id: i64) -> Result<MergePreview, MergeError> {
        self.require_service(source_service_id).await?;
        let line_items = self.ledger.count_line_items_by_service(source_service_id).await?;
        Ok(MergePreview {
            line_items,
            ..MergePreview::default()
        })
    }

    /// 把源服务的明细改挂到目标服务, 然后删除源服务
    pub async fn merge_services(
        &self,
        source_service_id: i64,
        target_service_id: i64,
    ) -> Result<MergeResult, MergeError> {
        if source_service_id == target_service_id {
            return Err(MergeError::InvalidRequest("source and target service are the same".to_string()));
        }
        self.require_service(source_service_id).await?;
        self.require_service(target_service_id).await?;

        let mut moved = MergeCounts::default();
        let outcome = self
            .apply_service_merge(source_service_id, target_service_id, &mut moved)
            .await;
        if outcome.is_ok() {
            tracing::info!(
                "Service {} merged into {}: {} line items",
                source_service_id, target_service_id, moved.moved_line_items
            );
        }
        Ok(finish(outcome, moved))
    }

    async fn apply_service_merge(
        &self,
        source: i64,
        target: i64,
        moved: &mut MergeCounts,
    ) -> Result<(), MergeError> {
        let preview = self.service_merge_preview(source).await?;
        let ledger = self.ledger.as_ref();

        let target_before = ledger.count_line_items_by_service(target).await?;
        moved.moved_line_items = ledger.reassign_line_items_to_service(source, target).await? as i64;
        ensure_postcondition(
            "reassign line items",
            0,
            ledger.count_line_items_by_service(source).await?,
        )?;

        ledger.delete_service(source).await?;
        let remaining = ledger.find_service_by_id(source).await?.is_some() as i64;
        ensure_postcondition("delete service", 0, remaining)?;
        moved.moved_services = 1;

        ensure_postcondition(
            "line item conservation",
            target_before + preview.line_items,
            ledger.count_line_items_by_service(target).await?,
        )?;
        Ok(())
    }
}
