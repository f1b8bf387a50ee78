//! 决策模型: 由差异结果 + 勾选集合生成导入决策 (纯函数, 可重复推导)。

use indexmap::IndexSet;
use std::collections::{HashMap, HashSet};

use crate::models::{
    DiffType, ImportAction, ImportDecision, InvoiceDiff, LineItemDecision, MergeStrategy, VoidedAction,
};

/// 策略选择: 全局默认 + 按发票号覆盖
#[derive(Debug, Clone, Default)]
pub struct StrategyChoice {
    pub global: MergeStrategy,
    pub per_invoice: HashMap<String, MergeStrategy>,
}

impl StrategyChoice {
    pub fn global(strategy: MergeStrategy) -> Self {
        Self {
            global: strategy,
            per_invoice: HashMap::new(),
        }
    }

    pub fn for_invoice(&self, invoice_number: &str) -> MergeStrategy {
        self.per_invoice.get(invoice_number).copied().unwrap_or(self.global)
    }
}

/// 差异结果中默认勾选的明细 key
pub fn default_selection(diffs: &[InvoiceDiff]) -> HashSet<String> {
    diffs
        .iter()
        .flat_map(|d| d.line_items.iter())
        .filter(|li| li.selected)
        .map(|li| li.line_item_key.clone())
        .collect()
}

/// 生成导入决策
///
/// 至少一条明细被勾选时发票为 import; 作废发票还需 `voided_action == import_unpaid`。
pub fn build_decisions(
    diffs: &[InvoiceDiff],
    selected_keys: &HashSet<String>,
    strategy: &StrategyChoice,
) -> Vec<ImportDecision> {
    diffs
        .iter()
        .map(|diff| {
            let merge_strategy = strategy.for_invoice(&diff.invoice_number);
            let keys: IndexSet<&str> = diff.line_items.iter().map(|li| li.line_item_key.as_str()).collect();
            let line_items: Vec<LineItemDecision> = keys
                .into_iter()
                .map(|key| LineItemDecision {
                    key: key.to_string(),
                    action: if selected_keys.contains(key) {
                        ImportAction::Import
                    } else {
                        ImportAction::Skip
                    },
                    merge_strategy,
                })
                .collect();

            let any_selected = line_items.iter().any(|li| li.action == ImportAction::Import);
            let voided_ok = diff.diff_type != DiffType::Voided
                || diff.voided_action == Some(VoidedAction::ImportUnpaid);
            let action = if any_selected && voided_ok {
                ImportAction::Import
            } else {
                ImportAction::Skip
            };

            ImportDecision {
                invoice_number: diff.invoice_number.clone(),
                action,
                merge_strategy,
                line_items,
            }
        })
        .collect()
}

/// 默认决策: 接受所有非 UNCHANGED 的明细
pub fn default_decisions(diffs: &[InvoiceDiff], strategy: MergeStrategy) -> Vec<ImportDecision> {
    build_decisions(diffs, &default_selection(diffs), &StrategyChoice::global(strategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiffCounts, InvoiceSummary, LineItemDiff};
    use bigdecimal::BigDecimal;

    fn line(key: &str, diff_type: DiffType) -> LineItemDiff {
        LineItemDiff {
            diff_type,
            line_item_key: key.to_string(),
            existing: None,
            incoming: None,
            field_diffs: vec![],
            selected: diff_type.selected_by_default(),
            merge_strategy: MergeStrategy::CsvWins,
        }
    }

    fn diff(number: &str, diff_type: DiffType, lines: Vec<LineItemDiff>) -> InvoiceDiff {
        InvoiceDiff {
            diff_type,
            vendor: "Acme".into(),
            invoice_number: number.into(),
            existing: None,
            incoming: InvoiceSummary {
                vendor: "Acme".into(),
                invoice_number: number.into(),
                invoice_date: None,
                total_amount: BigDecimal::from(0),
                paid_date: None,
                is_voided: diff_type == DiffType::Voided,
                line_item_count: lines.len(),
            },
            selected: lines.iter().any(|l| l.selected),
            line_items: lines,
            counts: DiffCounts::default(),
            voided_action: (diff_type == DiffType::Voided).then_some(VoidedAction::Skip),
        }
    }

    #[test]
    fn default_accepts_everything_but_unchanged() {
        let diffs = vec![
            diff("1", DiffType::Changed, vec![line("a", DiffType::Changed), line("b", DiffType::Unchanged)]),
            diff("2", DiffType::Unchanged, vec![line("c", DiffType::Unchanged), line("d", DiffType::Removed)]),
        ];
        let decisions = default_decisions(&diffs, MergeStrategy::CsvWins);
        assert_eq!(decisions[0].action, ImportAction::Import);
        assert_eq!(decisions[0].line_item_action("a"), ImportAction::Import);
        assert_eq!(decisions[0].line_item_action("b"), ImportAction::Skip);
        assert_eq!(decisions[1].action, ImportAction::Skip);
        assert_eq!(decisions[1].line_item_action("missing"), ImportAction::Skip);
    }

    #[test]
    fn voided_needs_explicit_import() {
        let mut diffs = vec![diff("9", DiffType::Voided, vec![line("v", DiffType::Voided)])];
        let selection = default_selection(&diffs);
        let strategy = StrategyChoice::global(MergeStrategy::CsvWins);
        assert_eq!(build_decisions(&diffs, &selection, &strategy)[0].action, ImportAction::Skip);

        diffs[0].voided_action = Some(VoidedAction::ImportUnpaid);
        assert_eq!(build_decisions(&diffs, &selection, &strategy)[0].action, ImportAction::Import);
    }

    #[test]
    fn per_invoice_strategy_and_determinism() {
        let diffs = vec![
            diff("1", DiffType::New, vec![line("a", DiffType::New)]),
            diff("2", DiffType::New, vec![line("b", DiffType::New)]),
        ];
        let mut strategy = StrategyChoice::global(MergeStrategy::CsvWins);
        strategy.per_invoice.insert("2".into(), MergeStrategy::KeepExisting);
        let selection: HashSet<String> = ["b".to_string()].into_iter().collect();

        let first = build_decisions(&diffs, &selection, &strategy);
        let second = build_decisions(&diffs, &selection, &strategy);
        assert_eq!(first, second);
        assert_eq!(first[0].action, ImportAction::Skip);
        assert_eq!(first[1].action, ImportAction::Import);
        assert_eq!(first[1].merge_strategy, MergeStrategy::KeepExisting);
        assert_eq!(first[1].line_items[0].merge_strategy, MergeStrategy::KeepExisting);
    }
}
