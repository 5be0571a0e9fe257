// ==========================================
// 生物工艺技术经济评估系统 - CMO/树脂合并分摊引擎
// ==========================================
// 依据: TEA_Master_Spec.md - 4.5 合并分摊
// 职责: CMO 固定/变动费与树脂费入池,按选定基准分摊到单位
// 红线: 分母为零 → 单位成本显式"无定义"(None),绝不除零、绝不造零
// ==========================================

use crate::domain::types::{AllocationBasis, StageId};
use crate::engine::stage::{note_codes, AdvisoryNote};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

// ==========================================
// 输入结构
// ==========================================

/// 分摊输入: 排程计数 + 费用构成 + 树脂参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationInput {
    /// 分摊基准
    pub basis: AllocationBasis,
    /// 实际执行批次数
    pub batches_executed: f64,
    /// 排程批次数
    pub batches_scheduled: f64,
    /// 放行合格批次数
    pub good_batches_released: f64,
    /// 放行总质量 (kg)
    pub mass_released_kg: f64,
    /// 总工艺小时
    pub total_process_hours: f64,
    /// CMO 标准单批费 (USD/批)
    pub cmo_standard_fee_usd: f64,
    /// CMO 营期摊销费 (USD/批)
    pub cmo_campaign_fee_usd: f64,
    /// CMO 年度保底费 (USD/年)
    pub cmo_annual_retainer_usd: f64,
    /// 树脂摊销费 (USD/批)
    pub resin_amortized_usd: f64,
    /// 树脂清洗再生费 (USD/批)
    pub resin_cleaning_usd: f64,
}

// ==========================================
// 输出结构
// ==========================================

/// 分摊结果
///
/// 单位成本为 Option: 分母为零时 None,调用方据此区分
/// "无定义"与"零成本"两种完全不同的语义。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationResult {
    pub basis: AllocationBasis,
    /// 分摊分母(基准对应的量)
    pub denominator: f64,
    /// CMO 固定费池 (USD)
    pub cmo_fixed_pool_usd: f64,
    /// CMO 变动费池 (USD)
    pub cmo_variable_pool_usd: f64,
    /// CMO 合计池 (USD)
    pub cmo_total_pool_usd: f64,
    /// 树脂费池 (USD)
    pub resin_pool_usd: f64,
    /// 合并总池 (USD)
    pub pooled_total_usd: f64,
    /// CMO 单位成本 (USD/单位)
    pub cmo_per_unit_usd: Option<f64>,
    /// 树脂单位成本 (USD/单位)
    pub resin_per_unit_usd: Option<f64>,
    /// 合并单位成本 (USD/单位)
    pub pooled_per_unit_usd: Option<f64>,
    /// 产能利用率 = 执行 / 排程(仅供参考,不进费用计算)
    pub utilization_fraction: Option<f64>,
}

// ==========================================
// AllocationEngine - 分摊引擎
// ==========================================
pub struct AllocationEngine;

impl AllocationEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// 计算合并分摊
    ///
    /// # 规则 (TEA_Master_Spec 4.5)
    /// - CMO 固定池 = 营期摊销费 × 执行批次 + 年度保底费
    /// - CMO 变动池 = 标准单批费 × 执行批次
    /// - 树脂池 = (摊销 + 清洗) × 执行批次
    /// - 各池及合并池 ÷ 基准分母;分母为零 → None + 说明条目
    #[instrument(skip(self, input))]
    pub fn compute_allocation(
        &self,
        input: &AllocationInput,
    ) -> (AllocationResult, Vec<AdvisoryNote>) {
        let mut notes = Vec::new();

        let executed = input.batches_executed.max(0.0);
        let cmo_fixed_pool_usd =
            input.cmo_campaign_fee_usd * executed + input.cmo_annual_retainer_usd;
        let cmo_variable_pool_usd = input.cmo_standard_fee_usd * executed;
        let cmo_total_pool_usd = cmo_fixed_pool_usd + cmo_variable_pool_usd;
        let resin_pool_usd =
            (input.resin_amortized_usd + input.resin_cleaning_usd) * executed;
        let pooled_total_usd = cmo_total_pool_usd + resin_pool_usd;

        let denominator = match input.basis {
            AllocationBasis::MassReleased => input.mass_released_kg,
            AllocationBasis::GoodBatchesReleased => input.good_batches_released,
            AllocationBasis::ScheduledCapacity => input.batches_scheduled,
            AllocationBasis::ProcessHours => input.total_process_hours,
        };

        let divide = |pool: f64| -> Option<f64> {
            if denominator > 0.0 {
                Some(pool / denominator)
            } else {
                None
            }
        };
        let cmo_per_unit_usd = divide(cmo_total_pool_usd);
        let resin_per_unit_usd = divide(resin_pool_usd);
        let pooled_per_unit_usd = divide(pooled_total_usd);

        if denominator <= 0.0 {
            notes.push(AdvisoryNote::new(
                StageId::FinalForm,
                note_codes::UNDEFINED_ALLOCATION,
                format!("分摊基准 {} 的分母为零,单位成本无定义", input.basis),
            ));
        }

        let utilization_fraction = if input.batches_scheduled > 0.0 {
            Some(executed / input.batches_scheduled)
        } else {
            None
        };

        debug!(
            basis = %input.basis,
            denominator,
            pooled_total_usd,
            "分摊计算完成"
        );

        (
            AllocationResult {
                basis: input.basis,
                denominator,
                cmo_fixed_pool_usd,
                cmo_variable_pool_usd,
                cmo_total_pool_usd,
                resin_pool_usd,
                pooled_total_usd,
                cmo_per_unit_usd,
                resin_per_unit_usd,
                pooled_per_unit_usd,
                utilization_fraction,
            },
            notes,
        )
    }
}

impl Default for AllocationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> AllocationInput {
        AllocationInput {
            basis: AllocationBasis::MassReleased,
            batches_executed: 10.0,
            batches_scheduled: 12.0,
            good_batches_released: 9.0,
            mass_released_kg: 400.0,
            total_process_hours: 1200.0,
            cmo_standard_fee_usd: 50_000.0,
            cmo_campaign_fee_usd: 20_000.0,
            cmo_annual_retainer_usd: 120_000.0,
            resin_amortized_usd: 6_000.0,
            resin_cleaning_usd: 1_000.0,
        }
    }

    #[test]
    fn test_pools_assembled_correctly() {
        let engine = AllocationEngine::new();
        let (out, notes) = engine.compute_allocation(&base_input());
        assert!((out.cmo_fixed_pool_usd - (20_000.0 * 10.0 + 120_000.0)).abs() < 1e-9);
        assert!((out.cmo_variable_pool_usd - 500_000.0).abs() < 1e-9);
        assert!((out.resin_pool_usd - 70_000.0).abs() < 1e-9);
        assert!(
            (out.pooled_total_usd
                - (out.cmo_total_pool_usd + out.resin_pool_usd))
                .abs()
                < 1e-9
        );
        assert!(notes.is_empty());
    }

    #[test]
    fn test_per_unit_by_mass_basis() {
        let engine = AllocationEngine::new();
        let (out, _) = engine.compute_allocation(&base_input());
        let expected = out.pooled_total_usd / 400.0;
        assert!((out.pooled_per_unit_usd.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_allocation_linearity() {
        // 批次加倍、分母同比例加倍 → 池加倍(保底费除外)而单位成本近似不变;
        // 先去掉保底费以验证纯线性
        let engine = AllocationEngine::new();
        let mut input = base_input();
        input.cmo_annual_retainer_usd = 0.0;
        let (one, _) = engine.compute_allocation(&input);
        let mut doubled = input.clone();
        doubled.batches_executed *= 2.0;
        doubled.mass_released_kg *= 2.0;
        let (two, _) = engine.compute_allocation(&doubled);
        assert!((two.cmo_total_pool_usd - one.cmo_total_pool_usd * 2.0).abs() < 1e-9);
        assert!(
            (two.pooled_per_unit_usd.unwrap() - one.pooled_per_unit_usd.unwrap()).abs() < 1e-9
        );
    }

    #[test]
    fn test_zero_denominator_is_undefined_not_zero() {
        let engine = AllocationEngine::new();
        let mut input = base_input();
        input.mass_released_kg = 0.0;
        let (out, notes) = engine.compute_allocation(&input);
        assert!(out.cmo_per_unit_usd.is_none());
        assert!(out.resin_per_unit_usd.is_none());
        assert!(out.pooled_per_unit_usd.is_none());
        // 池本身仍有定义
        assert!(out.pooled_total_usd > 0.0);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].code, note_codes::UNDEFINED_ALLOCATION);
    }

    #[test]
    fn test_basis_switch_changes_denominator() {
        let engine = AllocationEngine::new();
        let mut input = base_input();
        input.basis = AllocationBasis::ProcessHours;
        let (out, _) = engine.compute_allocation(&input);
        assert!((out.denominator - 1200.0).abs() < 1e-12);
        input.basis = AllocationBasis::GoodBatchesReleased;
        let (out, _) = engine.compute_allocation(&input);
        assert!((out.denominator - 9.0).abs() < 1e-12);
        input.basis = AllocationBasis::ScheduledCapacity;
        let (out, _) = engine.compute_allocation(&input);
        assert!((out.denominator - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_utilization_informational() {
        let engine = AllocationEngine::new();
        let (out, _) = engine.compute_allocation(&base_input());
        assert!((out.utilization_fraction.unwrap() - 10.0 / 12.0).abs() < 1e-12);
    }
}
