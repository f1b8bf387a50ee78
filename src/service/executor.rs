//! 批量执行器: 按决策把导入发票写入账本。
//!
//! 批次之间、批次内发票之间都严格顺序执行: 后面的发票可能依赖前面刚创建的
//! 供应商/订阅/服务。单张发票失败只记录到结果中, 不中断批次。

use bigdecimal::{BigDecimal, Zero};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::db::{Ledger, SharedLedger};
use crate::error::{ImportError, LedgerError};
use crate::models::{
    BatchCounts, BatchResult, ImportAction, ImportDecision, InvoiceError, InvoiceHeader,
    InvoiceLineItem, InvoiceStatus, MergeStrategy, NewInvoice, NewLineItem, ParsedInvoice,
    ServiceUpsert, StandardLineItem, Subscription, UpsertOutcome,
};
use crate::service::diff_engine::ExistingIndex;
use crate::service::grouper::partition_batches;
use crate::service::matching::{existing_key, incoming_key, normalize_service_name};

/// 懒创建的主订阅名称
pub const MASTER_SUBSCRIPTION_NAME: &str = "Master Agreement";

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// 批执行请求 (由编排方逐批调用)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub canonical_rows: Vec<StandardLineItem>,
    #[serde(default)]
    pub decisions: Option<Vec<ImportDecision>>,
    #[serde(default)]
    pub global_strategy: MergeStrategy,
    #[serde(default)]
    pub batch_index: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub total_batches: Option<usize>,
}

/// 批次位置; 批次号与批大小属于调用契约, 因此中断后可从下一批继续
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSpec {
    pub batch_index: usize,
    pub batch_size: usize,
    pub total_batches: Option<usize>,
}

/// 取得供应商的主订阅, 不存在则创建; 返回 (订阅, 是否新建)
pub async fn ensure_master_subscription(
    ledger: &dyn Ledger,
    vendor_id: i64,
) -> Result<(Subscription, bool), LedgerError> {
    if let Some(subscription) = ledger.find_latest_subscription_by_vendor(vendor_id).await? {
        return Ok((subscription, false));
    }
    let subscription = ledger.create_subscription(vendor_id, MASTER_SUBSCRIPTION_NAME).await?;
    tracing::info!("Created master subscription {} for vendor {}", subscription.id, vendor_id);
    Ok((subscription, true))
}

#[derive(Debug, Clone, Copy)]
struct ResolvedVendor {
    vendor_id: i64,
    subscription_id: i64,
}

/// 单次 execute 内的累加器: 已解析的供应商/订阅 id
///
/// 生命周期仅限一次调用, 跨批次总是重新查询账本。
#[derive(Default)]
struct ExecutionContext {
    vendors: HashMap<String, ResolvedVendor>,
}

impl ExecutionContext {
    async fn resolve_vendor(
        &mut self,
        ledger: &dyn Ledger,
        name: &str,
        counts: &mut BatchCounts,
    ) -> Result<ResolvedVendor, LedgerError> {
        let key = name.trim().to_lowercase();
        if let Some(resolved) = self.vendors.get(&key) {
            return Ok(*resolved);
        }

        let vendor = match ledger.find_vendor_by_name(name).await? {
            Some(vendor) => vendor,
            None => {
                let vendor = ledger.create_vendor(name).await?;
                counts.vendors.created += 1;
                tracing::info!("Created vendor {} ({})", vendor.name, vendor.id);
                vendor
            }
        };

        let (subscription, created) = ensure_master_subscription(ledger, vendor.id).await?;
        if created {
            counts.subscriptions.created += 1;
        }

        let resolved = ResolvedVendor {
            vendor_id: vendor.id,
            subscription_id: subscription.id,
        };
        self.vendors.insert(key, resolved);
        Ok(resolved)
    }
}

/// 单张发票的执行计划: 跳过, 或生效策略 + 明细勾选
enum InvoicePlan {
    Skip(&'static str),
    Apply {
        strategy: MergeStrategy,
        /// `None` 表示全部明细
        selected: Option<HashSet<String>>,
    },
}

/// 按发票号索引的决策
pub(crate) type DecisionIndex<'a> = HashMap<&'a str, &'a ImportDecision>;

pub(crate) fn index_decisions(list: &[ImportDecision]) -> DecisionIndex<'_> {
    list.iter().map(|d| (d.invoice_number.as_str(), d)).collect()
}

fn plan_invoice(
    invoice: &ParsedInvoice,
    decisions: Option<&DecisionIndex<'_>>,
    global_strategy: MergeStrategy,
) -> InvoicePlan {
    let plan = match decisions {
        None if invoice.is_voided => return InvoicePlan::Skip("voided without decision"),
        None => InvoicePlan::Apply {
            strategy: global_strategy,
            selected: None,
        },
        Some(map) => match map.get(invoice.invoice_number.as_str()) {
            None => return InvoicePlan::Skip("no decision"),
            Some(d) if d.action == ImportAction::Skip => return InvoicePlan::Skip("decision skip"),
            Some(d) => InvoicePlan::Apply {
                strategy: d.merge_strategy,
                selected: Some(
                    d.line_items
                        .iter()
                        .filter(|li| li.action == ImportAction::Import)
                        .map(|li| li.key.clone())
                        .collect(),
                ),
            },
        },
    };
    match plan {
        InvoicePlan::Apply { strategy: MergeStrategy::Skip, .. } => InvoicePlan::Skip("strategy skip"),
        other => other,
    }
}

fn sum_totals<'a>(amounts: impl Iterator<Item = &'a BigDecimal>) -> BigDecimal {
    amounts.fold(BigDecimal::zero(), |acc, v| acc + v)
}

/// 同一发票内按服务名聚合数量与金额
fn aggregate_services(items: &[&StandardLineItem], invoice: &ParsedInvoice) -> IndexMap<String, ServiceUpsert> {
    let mut services: IndexMap<String, ServiceUpsert> = IndexMap::new();
    for item in items {
        let name = item.service_name();
        let entry = services
            .entry(normalize_service_name(&name))
            .or_insert_with(|| ServiceUpsert {
                name,
                quantity: BigDecimal::zero(),
                unit_price: BigDecimal::zero(),
                amount: BigDecimal::zero(),
                invoice_date: invoice.invoice_date,
            });
        entry.quantity += &item.quantity;
        entry.amount += &item.total_price;
        entry.unit_price = item.unit_price.clone();
    }
    services
}

pub struct BatchExecutor {
    ledger: SharedLedger,
}

impl BatchExecutor {
    pub fn new(ledger: SharedLedger) -> Self {
        Self { ledger }
    }

    pub async fn execute_request(&self, req: &BatchRequest) -> Result<BatchResult, ImportError> {
        self.execute(
            &req.canonical_rows,
            req.decisions.as_deref(),
            req.global_strategy,
            BatchSpec {
                batch_index: req.batch_index,
                batch_size: req.batch_size,
                total_batches: req.total_batches,
            },
        )
        .await
    }

    /// 执行一个批次
    ///
    /// 非法请求在访问账本之前拒绝; 单张发票失败记入 `errors` 并继续。
    pub async fn execute(
        &self,
        rows: &[StandardLineItem],
        decisions: Option<&[ImportDecision]>,
        global_strategy: MergeStrategy,
        spec: BatchSpec,
    ) -> Result<BatchResult, ImportError> {
        if rows.is_empty() {
            return Err(ImportError::InvalidRequest("canonical rows are empty".to_string()));
        }
        if spec.batch_size == 0 {
            return Err(ImportError::InvalidRequest("batch size must be positive".to_string()));
        }

        let mut batches = partition_batches(rows, spec.batch_size);
        let total_batches = batches.len();
        if spec.batch_index >= total_batches {
            return Err(ImportError::InvalidRequest(format!(
                "batch index {} out of range (total {})",
                spec.batch_index, total_batches
            )));
        }
        if let Some(expected) = spec.total_batches {
            if expected != total_batches {
                tracing::warn!(
                    "Caller expects {} batches but rows partition into {}",
                    expected, total_batches
                );
            }
        }

        let decision_map = decisions.map(index_decisions);
        let invoices = batches.swap_remove(spec.batch_index);
        Ok(self
            .execute_invoices(&invoices, decision_map.as_ref(), global_strategy, spec.batch_index, total_batches)
            .await)
    }

    /// 执行已切分好的一批发票
    ///
    /// 编排方一次切分后逐批调用, 避免每批重新分组全部行。
    pub(crate) async fn execute_invoices(
        &self,
        invoices: &[ParsedInvoice],
        decisions: Option<&DecisionIndex<'_>>,
        global_strategy: MergeStrategy,
        batch_index: usize,
        total_batches: usize,
    ) -> BatchResult {
        tracing::info!(
            "Batch {}/{}: {} invoices",
            batch_index + 1, total_batches, invoices.len()
        );

        let mut ctx = ExecutionContext::default();
        let mut counts = BatchCounts::default();
        let mut errors = Vec::new();

        for invoice in invoices {
            let plan = plan_invoice(invoice, decisions, global_strategy);
            if let Err(e) = self.process_invoice(&mut ctx, invoice, plan, &mut counts).await {
                tracing::error!(
                    "Invoice {} / {} failed: {}",
                    invoice.vendor, invoice.invoice_number, e
                );
                errors.push(InvoiceError {
                    vendor: invoice.vendor.clone(),
                    invoice_number: invoice.invoice_number.clone(),
                    message: e.to_string(),
                });
            }
        }

        tracing::info!(
            "Batch {}/{} done: invoices +{} ~{} skip {}, line items +{}, errors {}",
            batch_index + 1,
            total_batches,
            counts.invoices.created,
            counts.invoices.updated,
            counts.invoices.skipped,
            counts.line_items.created,
            errors.len()
        );

        BatchResult {
            success: errors.is_empty(),
            batch_index,
            total_batches,
            has_more: batch_index + 1 < total_batches,
            counts,
            errors,
        }
    }

    async fn process_invoice(
        &self,
        ctx: &mut ExecutionContext,
        invoice: &ParsedInvoice,
        plan: InvoicePlan,
        counts: &mut BatchCounts,
    ) -> Result<(), LedgerError> {
        let ledger = self.ledger.as_ref();
        let number = invoice.invoice_number.as_str();

        let (strategy, selected) = match plan {
            InvoicePlan::Skip(reason) => {
                tracing::debug!("Invoice {} skipped: {}", number, reason);
                counts.invoices.skipped += 1;
                counts.line_items.skipped += invoice.line_items.len();
                return Ok(());
            }
            InvoicePlan::Apply { strategy, selected } => (strategy, selected),
        };

        let existing = ledger.find_invoice_by_number(number).await?;
        if existing.is_some() && strategy == MergeStrategy::KeepExisting {
            tracing::debug!("Invoice {} exists, keep_existing", number);
            counts.invoices.skipped += 1;
            counts.line_items.skipped += invoice.line_items.len();
            return Ok(());
        }

        // 已存在的发票整体替换为全部导入明细, 与勾选无关; 新发票只写勾选明细
        let to_write: Vec<&StandardLineItem> = match (&existing, &selected) {
            (Some(_), _) | (None, None) => invoice.line_items.iter().collect(),
            (None, Some(keys)) => invoice
                .line_items
                .iter()
                .filter(|li| keys.contains(&incoming_key(li)))
                .collect(),
        };
        counts.line_items.skipped += invoice.line_items.len() - to_write.len();
        if to_write.is_empty() {
            counts.invoices.skipped += 1;
            return Ok(());
        }

        let resolved = ctx.resolve_vendor(ledger, &invoice.vendor, counts).await?;

        let (status, paid_date) = if invoice.is_voided {
            (InvoiceStatus::Pending, None)
        } else if invoice.paid_date.is_some() {
            (InvoiceStatus::Paid, invoice.paid_date)
        } else {
            (InvoiceStatus::Unpaid, None)
        };

        // 保留未被认领的旧明细; 删除是显式选择, 只有 REMOVED key 被勾选时才真正移除
        let preserved: Vec<InvoiceLineItem> = match &existing {
            Some(current) => {
                let current_items = ledger.list_invoice_line_items(current.id).await?;
                let mut index = ExistingIndex::new(number, &current_items);
                for item in &invoice.line_items {
                    index.claim(item);
                }
                index
                    .unclaimed()
                    .filter(|old| match &selected {
                        None => true,
                        Some(keys) => !keys.contains(&existing_key(number, old)),
                    })
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };

        // 服务先于发票写入解析, 发票本身的改写在一次账本调用内完成
        let mut service_ids: HashMap<String, i64> = HashMap::new();
        for (key, upsert) in aggregate_services(&to_write, invoice) {
            let (service_id, outcome) = ledger.upsert_service(resolved.subscription_id, &upsert).await?;
            match outcome {
                UpsertOutcome::Created => counts.services.created += 1,
                UpsertOutcome::Updated => counts.services.updated += 1,
                UpsertOutcome::Stale => counts.services.skipped += 1,
            }
            service_ids.insert(key, service_id);
        }

        let header = InvoiceHeader {
            vendor_id: resolved.vendor_id,
            subscription_id: resolved.subscription_id,
            invoice_date: invoice.invoice_date,
            total_amount: sum_totals(to_write.iter().map(|li| &li.total_price))
                + sum_totals(preserved.iter().map(|li| &li.total_amount)),
            paid_date,
            status,
        };
        let line_items_for = |invoice_id: i64| -> Vec<NewLineItem> {
            let mut items: Vec<NewLineItem> = to_write
                .iter()
                .map(|li| NewLineItem {
                    invoice_id,
                    service_id: service_ids.get(&normalize_service_name(&li.service_name())).copied(),
                    description: li.description.clone(),
                    service_month: li.service_month.clone(),
                    quantity: li.quantity.clone(),
                    unit_price: li.unit_price.clone(),
                    total_amount: li.total_price.clone(),
                    period_start: li.period_start,
                    period_end: li.period_end,
                })
                .collect();
            items.extend(preserved.iter().map(|old| NewLineItem {
                invoice_id,
                service_id: old.service_id,
                description: old.description.clone(),
                service_month: old.service_month.clone(),
                quantity: old.quantity.clone(),
                unit_price: old.unit_price.clone(),
                total_amount: old.total_amount.clone(),
                period_start: old.period_start,
                period_end: old.period_end,
            }));
            items
        };

        match existing {
            Some(current) => {
                let deleted = ledger
                    .replace_invoice_line_items(current.id, &header, &line_items_for(current.id))
                    .await?;
                counts.line_items_deleted += deleted as usize;
                counts.invoices.updated += 1;
                tracing::debug!("Invoice {} updated, {} old line items replaced", number, deleted);
            }
            None => {
                let created = ledger
                    .create_invoice(&NewInvoice {
                        invoice_number: number.to_string(),
                        header,
                    })
                    .await?;
                ledger.add_line_items(&line_items_for(created.id)).await?;
                counts.invoices.created += 1;
            }
        }

        counts.line_items.created += to_write.len();
        counts.line_items_preserved += preserved.len();
        Ok(())
    }
}
