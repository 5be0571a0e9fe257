// ==========================================
// 生物工艺技术经济评估系统 - 成本台账
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 8. Cost Ledger
// 红线: 台账只追加,不覆写;总额永远是逐条求和,禁止缓存
// 红线: 负数金额拒绝入账(报错),不允许静默轧差
// ==========================================

use crate::domain::types::{CostCategory, StageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ==========================================
// 台账错误类型
// ==========================================

/// 成本台账错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("负数金额拒绝入账: category={category}, amount_usd={amount_usd}, stage={stage}")]
    NegativeAmount {
        category: CostCategory,
        amount_usd: f64,
        stage: StageId,
    },

    #[error("非法金额(NaN/Inf): category={category}, stage={stage}")]
    NonFiniteAmount {
        category: CostCategory,
        stage: StageId,
    },
}

// ==========================================
// CostEntry - 台账条目
// ==========================================

/// 成本台账条目 (科目, 金额, 来源阶段)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub category: CostCategory,
    pub amount_usd: f64,
    pub stage: StageId,
}

// ==========================================
// CostLedger - 成本台账
// ==========================================

/// 追加式成本台账
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostLedger {
    entries: Vec<CostEntry>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// 追加一条成本
    ///
    /// # 规则
    /// - amount_usd < 0 → 拒绝 (LedgerError::NegativeAmount)
    /// - amount_usd 非有限数 → 拒绝 (LedgerError::NonFiniteAmount)
    /// - amount_usd = 0 允许入账(保留审计痕迹)
    pub fn add(
        &mut self,
        category: CostCategory,
        amount_usd: f64,
        stage: StageId,
    ) -> Result<(), LedgerError> {
        if !amount_usd.is_finite() {
            return Err(LedgerError::NonFiniteAmount { category, stage });
        }
        if amount_usd < 0.0 {
            return Err(LedgerError::NegativeAmount {
                category,
                amount_usd,
                stage,
            });
        }
        self.entries.push(CostEntry {
            category,
            amount_usd,
            stage,
        });
        Ok(())
    }

    /// 全部条目总额 (USD)
    ///
    /// 总额永远是逐条求和,不做任何缓存,保证与 add 调用严格一致。
    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.amount_usd).sum()
    }

    /// 指定科目总额 (USD)
    pub fn total_for(&self, category: CostCategory) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .map(|e| e.amount_usd)
            .sum()
    }

    /// 指定阶段总额 (USD)
    pub fn total_for_stage(&self, stage: StageId) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.stage == stage)
            .map(|e| e.amount_usd)
            .sum()
    }

    /// 按科目汇总(确定性遍历顺序,供报表使用)
    pub fn totals_by_category(&self) -> BTreeMap<CostCategory, f64> {
        let mut totals = BTreeMap::new();
        for entry in &self.entries {
            *totals.entry(entry.category).or_insert(0.0) += entry.amount_usd;
        }
        totals
    }

    /// 条目只读视图
    pub fn entries(&self) -> &[CostEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
