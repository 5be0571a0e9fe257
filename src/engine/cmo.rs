// ==========================================
// 生物工艺技术经济评估系统 - CMO 合同计费引擎
// ==========================================
// 依据: TEA_Master_Spec.md - 4.4 CMO 合同计费
// 职责: 由阶段工时 + 费率卡 + 折扣曲线 + 合同排程计算单批费用
// 红线: 一次性费用必须摊销,不得整额计入单批
// ==========================================

use crate::domain::types::StageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// 长期合同因子封顶年限
const LONG_TERM_HORIZON_YEARS: f64 = 3.0;

// ==========================================
// 输入结构
// ==========================================

/// 各计费阶段工时汇总(由编排器从阶段输出聚合)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CmoTimings {
    /// 各阶段工艺小时
    pub stage_hours: BTreeMap<StageId, f64>,
}

impl CmoTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: StageId, hours: f64) {
        let entry = self.stage_hours.entry(stage).or_insert(0.0);
        // 同一阶段多个子步骤计费取最长者(占用同一套设备位)
        if hours > *entry {
            *entry = hours;
        }
    }

    pub fn hours_of(&self, stage: StageId) -> f64 {
        self.stage_hours.get(&stage).copied().unwrap_or(0.0)
    }
}

/// 费率卡
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmoRateCard {
    /// 日费率 (USD/设备日)
    pub day_rate_usd: f64,
    /// 单阶段最短计费天数
    pub min_days_per_stage: f64,
    /// 物料转售加价比例 (0.1 = 10%)
    pub materials_markup: f64,
    /// 营地启动费 (USD/营期)
    pub campaign_setup_usd: f64,
    /// 产能预留费 (USD/年)
    pub facility_reservation_usd: f64,
    /// 工艺验证费 (USD/合同)
    pub validation_usd: f64,
    /// 年度保底服务费 (USD/年)
    pub annual_retainer_usd: f64,
}

impl Default for CmoRateCard {
    fn default() -> Self {
        Self {
            day_rate_usd: 25_000.0,
            min_days_per_stage: 1.0,
            materials_markup: 0.10,
            campaign_setup_usd: 80_000.0,
            facility_reservation_usd: 250_000.0,
            validation_usd: 400_000.0,
            annual_retainer_usd: 120_000.0,
        }
    }
}

/// 折扣曲线
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmoDiscountCurve {
    /// 营期折扣深度 (0.15 = 满期最多让利 15%)
    pub campaign_discount: f64,
    /// 长期合同折扣深度(随合同年限线性生效,3 年封顶)
    pub long_term_discount: f64,
    /// 年度涨价率
    pub escalation_rate: f64,
}

impl Default for CmoDiscountCurve {
    fn default() -> Self {
        Self {
            campaign_discount: 0.15,
            long_term_discount: 0.10,
            escalation_rate: 0.03,
        }
    }
}

/// 合同排程结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStructure {
    /// 每营期批次数
    pub batches_per_campaign: f64,
    /// 每年批次数
    pub batches_per_year: f64,
    /// 合同年限
    pub contract_years: f64,
}

impl Default for CampaignStructure {
    fn default() -> Self {
        Self {
            batches_per_campaign: 4.0,
            batches_per_year: 12.0,
            contract_years: 3.0,
        }
    }
}

// ==========================================
// 输出结构
// ==========================================

/// 合同计费分解(单批口径)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmoContractBreakdown {
    /// 各阶段基础计费(折扣后,USD/批)
    pub per_stage_costs: BTreeMap<StageId, f64>,
    /// 物料转售加价 (USD/批)
    pub materials_fee_usd: f64,
    /// 营期启动费摊销 (USD/批)
    pub setup_amortized_usd: f64,
    /// 产能预留费摊销 (USD/批)
    pub reservation_amortized_usd: f64,
    /// 验证费摊销 (USD/批)
    pub validation_amortized_usd: f64,
    /// 年度保底费摊销 (USD/批)
    pub retainer_amortized_usd: f64,
    /// 综合折扣因子(营期 × 长期 × 涨价)
    pub effective_factor: f64,
    /// 标准经常性费用合计 (USD/批)
    pub standard_batch_total_usd: f64,
    /// 一次性费用摊销合计 (USD/批)
    pub campaign_adders_total_usd: f64,
    /// 单批总计 (USD/批)
    pub grand_total_per_batch_usd: f64,
}

// ==========================================
// CmoContractEngine - 合同计费引擎
// ==========================================
pub struct CmoContractEngine;

impl CmoContractEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// 计算单批合同费用
    ///
    /// # 规则 (TEA_Master_Spec 4.4)
    /// - 阶段基础费 = max(阶段工时, 最短计费天数×24) / 24 × 日费率
    /// - 营期折扣因子 = 1 − d × (1 − 1/每营期批次数);单批营期不打折
    /// - 长期因子 = 1 − d_lt × min(合同年限, 3) / 3
    /// - 涨价因子 = 3 年复利序列的平均值 = (1 + (1+r) + (1+r)²) / 3
    /// - 启动费 ÷ 每营期批次数;预留费 ÷ 年批次数;
    ///   验证费 ÷ (年批次数 × 合同年限)
    /// - 物料费 = 物料成本 × 加价比例(转售差价,经常性)
    #[instrument(skip(self, timings, rates, discount, campaign))]
    pub fn compute_contract_costs(
        &self,
        timings: &CmoTimings,
        rates: &CmoRateCard,
        discount: &CmoDiscountCurve,
        campaign: &CampaignStructure,
        materials_cost_usd: f64,
    ) -> CmoContractBreakdown {
        let batches_per_campaign = campaign.batches_per_campaign.max(1.0);
        let batches_per_year = campaign.batches_per_year.max(1.0);
        let contract_years = campaign.contract_years.max(1.0);

        let campaign_factor =
            1.0 - discount.campaign_discount * (1.0 - 1.0 / batches_per_campaign);
        let long_term_factor = 1.0
            - discount.long_term_discount
                * (contract_years.min(LONG_TERM_HORIZON_YEARS) / LONG_TERM_HORIZON_YEARS);
        let r = discount.escalation_rate;
        let escalation_factor = (1.0 + (1.0 + r) + (1.0 + r) * (1.0 + r)) / 3.0;
        let effective_factor = campaign_factor * long_term_factor * escalation_factor;

        let min_hours = rates.min_days_per_stage.max(0.0) * 24.0;
        let mut per_stage_costs = BTreeMap::new();
        for (stage, hours) in &timings.stage_hours {
            let billable_hours = hours.max(min_hours);
            let base = billable_hours / 24.0 * rates.day_rate_usd;
            per_stage_costs.insert(*stage, base * effective_factor);
        }

        let materials_fee_usd = materials_cost_usd.max(0.0) * rates.materials_markup.max(0.0);
        let standard_batch_total_usd: f64 =
            per_stage_costs.values().sum::<f64>() + materials_fee_usd;

        let setup_amortized_usd = rates.campaign_setup_usd / batches_per_campaign;
        let reservation_amortized_usd = rates.facility_reservation_usd / batches_per_year;
        let validation_amortized_usd =
            rates.validation_usd / (batches_per_year * contract_years);
        let retainer_amortized_usd = rates.annual_retainer_usd / batches_per_year;
        let campaign_adders_total_usd = setup_amortized_usd
            + reservation_amortized_usd
            + validation_amortized_usd
            + retainer_amortized_usd;

        let grand_total_per_batch_usd = standard_batch_total_usd + campaign_adders_total_usd;

        debug!(
            effective_factor,
            standard_batch_total_usd, campaign_adders_total_usd, "合同计费完成"
        );

        CmoContractBreakdown {
            per_stage_costs,
            materials_fee_usd,
            setup_amortized_usd,
            reservation_amortized_usd,
            validation_amortized_usd,
            retainer_amortized_usd,
            effective_factor,
            standard_batch_total_usd,
            campaign_adders_total_usd,
            grand_total_per_batch_usd,
        }
    }
}

impl Default for CmoContractEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings_of(entries: &[(StageId, f64)]) -> CmoTimings {
        let mut t = CmoTimings::new();
        for (stage, hours) in entries {
            t.record(*stage, *hours);
        }
        t
    }

    fn no_discount() -> CmoDiscountCurve {
        CmoDiscountCurve {
            campaign_discount: 0.0,
            long_term_discount: 0.0,
            escalation_rate: 0.0,
        }
    }

    #[test]
    fn test_single_batch_campaign_has_no_campaign_discount() {
        // 每营期 1 批 → 营期折扣因子 = 1.0
        let engine = CmoContractEngine::new();
        let discount = CmoDiscountCurve {
            campaign_discount: 0.15,
            long_term_discount: 0.0,
            escalation_rate: 0.0,
        };
        let campaign = CampaignStructure {
            batches_per_campaign: 1.0,
            batches_per_year: 12.0,
            contract_years: 1.0,
        };
        let out = engine.compute_contract_costs(
            &timings_of(&[(StageId::Fermentation, 72.0)]),
            &CmoRateCard::default(),
            &discount,
            &campaign,
            0.0,
        );
        assert!((out.effective_factor - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_minimum_duration_floor() {
        // 6 小时工时按最短 1 天计费
        let engine = CmoContractEngine::new();
        let rates = CmoRateCard {
            day_rate_usd: 24_000.0,
            min_days_per_stage: 1.0,
            materials_markup: 0.0,
            campaign_setup_usd: 0.0,
            facility_reservation_usd: 0.0,
            validation_usd: 0.0,
            annual_retainer_usd: 0.0,
        };
        let out = engine.compute_contract_costs(
            &timings_of(&[(StageId::Polish, 6.0)]),
            &rates,
            &no_discount(),
            &CampaignStructure::default(),
            0.0,
        );
        assert!((out.per_stage_costs[&StageId::Polish] - 24_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_term_factor_caps_at_three_years() {
        let engine = CmoContractEngine::new();
        let discount = CmoDiscountCurve {
            campaign_discount: 0.0,
            long_term_discount: 0.10,
            escalation_rate: 0.0,
        };
        let mk = |years: f64| CampaignStructure {
            batches_per_campaign: 1.0,
            batches_per_year: 12.0,
            contract_years: years,
        };
        let run = |years: f64| {
            engine
                .compute_contract_costs(
                    &timings_of(&[(StageId::Capture, 48.0)]),
                    &CmoRateCard::default(),
                    &discount,
                    &mk(years),
                    0.0,
                )
                .effective_factor
        };
        assert!((run(3.0) - 0.90).abs() < 1e-12);
        // 超过 3 年不再加深
        assert!((run(10.0) - run(3.0)).abs() < 1e-12);
        assert!(run(1.0) > run(3.0));
    }

    #[test]
    fn test_escalation_is_three_year_average() {
        let engine = CmoContractEngine::new();
        let discount = CmoDiscountCurve {
            campaign_discount: 0.0,
            long_term_discount: 0.0,
            escalation_rate: 0.03,
        };
        let out = engine.compute_contract_costs(
            &timings_of(&[(StageId::Capture, 48.0)]),
            &CmoRateCard::default(),
            &discount,
            &CampaignStructure {
                batches_per_campaign: 1.0,
                batches_per_year: 12.0,
                contract_years: 1.0,
            },
            0.0,
        );
        let expected = (1.0 + 1.03 + 1.03 * 1.03) / 3.0;
        assert!((out.effective_factor - expected).abs() < 1e-12);
    }

    #[test]
    fn test_one_off_fee_amortization() {
        let engine = CmoContractEngine::new();
        let rates = CmoRateCard {
            day_rate_usd: 0.0,
            min_days_per_stage: 0.0,
            materials_markup: 0.0,
            campaign_setup_usd: 80_000.0,
            facility_reservation_usd: 240_000.0,
            validation_usd: 360_000.0,
            annual_retainer_usd: 120_000.0,
        };
        let campaign = CampaignStructure {
            batches_per_campaign: 4.0,
            batches_per_year: 12.0,
            contract_years: 3.0,
        };
        let out = engine.compute_contract_costs(
            &CmoTimings::new(),
            &rates,
            &no_discount(),
            &campaign,
            0.0,
        );
        assert!((out.setup_amortized_usd - 20_000.0).abs() < 1e-9);
        assert!((out.reservation_amortized_usd - 20_000.0).abs() < 1e-9);
        // 验证费再除以合同年限: 360000 / (12 × 3)
        assert!((out.validation_amortized_usd - 10_000.0).abs() < 1e-9);
        assert!((out.retainer_amortized_usd - 10_000.0).abs() < 1e-9);
        assert!((out.campaign_adders_total_usd - 60_000.0).abs() < 1e-9);
        assert!((out.grand_total_per_batch_usd - 60_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_materials_markup_is_recurring() {
        let engine = CmoContractEngine::new();
        let out = engine.compute_contract_costs(
            &CmoTimings::new(),
            &CmoRateCard::default(),
            &no_discount(),
            &CampaignStructure::default(),
            100_000.0,
        );
        assert!((out.materials_fee_usd - 10_000.0).abs() < 1e-9);
        assert!((out.standard_batch_total_usd - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_keeps_longest_substep() {
        let mut t = CmoTimings::new();
        t.record(StageId::Capture, 8.0);
        t.record(StageId::Capture, 12.0);
        t.record(StageId::Capture, 4.0);
        assert!((t.hours_of(StageId::Capture) - 12.0).abs() < 1e-12);
    }
}
