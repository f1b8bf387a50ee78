use serde::{Deserialize, Serialize};

/// 冲突处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// 导入数据覆盖账本
    #[default]
    CsvWins,
    /// 已存在的发票保持不动
    KeepExisting,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    Import,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemDecision {
    pub key: String,
    pub action: ImportAction,
    pub merge_strategy: MergeStrategy,
}

/// 单张发票的导入决策, 未覆盖的明细 key 视为跳过
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDecision {
    pub invoice_number: String,
    pub action: ImportAction,
    pub merge_strategy: MergeStrategy,
    pub line_items: Vec<LineItemDecision>,
}

impl ImportDecision {
    pub fn line_item_action(&self, key: &str) -> ImportAction {
        self.line_items
            .iter()
            .find(|d| d.key == key)
            .map(|d| d.action)
            .unwrap_or(ImportAction::Skip)
    }
}
