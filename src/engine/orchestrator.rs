// ==========================================
// 生物工艺技术经济评估系统 - 管线编排器
// ==========================================
// 依据: TEA_Master_Spec.md - PART B 管线编排
// 职责: 按固定顺序串联八个阶段,贯穿物料流/交接记录/成本台账,
//       末端计算 CMO 合同费用与合并分摊
// 红线: 单线程确定性执行,阶段间无共享可变状态
// 红线: 配置/守恒错误立即上抛,不返回部分结果;说明条目随成功结果返回
// ==========================================

use crate::config::{config_keys, ProcessConfigReader};
use crate::domain::stream::{components, MaterialStream};
use crate::domain::types::{AllocationBasis, CostCategory, RouteOverride, StageId};
use crate::domain::{CostLedger, HandoffRecord};
use crate::engine::allocation::{AllocationEngine, AllocationInput, AllocationResult};
use crate::engine::capture::CaptureEngine;
use crate::engine::cell_removal::CellRemovalEngine;
use crate::engine::cmo::{
    CampaignStructure, CmoContractBreakdown, CmoContractEngine, CmoDiscountCurve, CmoRateCard,
    CmoTimings,
};
use crate::engine::concentration::ConcentrationEngine;
use crate::engine::conditioning::ConditioningEngine;
use crate::engine::error::EngineError;
use crate::engine::final_form::FinalFormEngine;
use crate::engine::polish::PolishEngine;
use crate::engine::stage::{AdvisoryNote, FeedSnapshot, StageOutput};
use crate::engine::upstream::{FermentationEngine, SeedGrowthEngine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument};
use uuid::Uuid;

// ==========================================
// Scenario - 评估情景
// ==========================================

/// 评估情景: 合同与排程口径(工艺参数走配置提供方)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: String,
    pub rates: CmoRateCard,
    pub discount: CmoDiscountCurve,
    pub campaign: CampaignStructure,
    /// 实际执行批次数(年口径)
    pub batches_executed: f64,
    /// 排程批次数(年口径)
    pub batches_scheduled: f64,
    /// 放行合格批次数(年口径)
    pub good_batches_released: f64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "baseline".to_string(),
            rates: CmoRateCard::default(),
            discount: CmoDiscountCurve::default(),
            campaign: CampaignStructure::default(),
            batches_executed: 12.0,
            batches_scheduled: 12.0,
            good_batches_released: 12.0,
        }
    }
}

// ==========================================
// StageReport - 阶段审计报表
// ==========================================

/// 单阶段审计报表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageId,
    /// 解析出的路线码(无路线的上游阶段为 None)
    pub route: Option<String>,
    pub recovery_fraction: f64,
    pub process_hours: f64,
    pub cost_usd: f64,
    pub pool_volume_l: f64,
    pub product_kg: f64,
}

// ==========================================
// PipelineResult - 管线运行结果
// ==========================================

/// 管线运行结果(成功口径;失败直接 Err,无部分结果)
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub scenario_name: String,
    pub final_stream: MaterialStream,
    /// 单批放行产品质量 (kg)
    pub released_product_kg: f64,
    pub stage_reports: Vec<StageReport>,
    pub ledger: CostLedger,
    pub totals_by_category: BTreeMap<CostCategory, f64>,
    pub cmo_breakdown: CmoContractBreakdown,
    pub allocation: AllocationResult,
    /// 全管线说明条目(按阶段顺序累积)
    pub notes: Vec<AdvisoryNote>,
}

// ==========================================
// PipelineOrchestrator - 管线编排器
// ==========================================
pub struct PipelineOrchestrator<C: ProcessConfigReader> {
    cfg: C,
    seed_growth: SeedGrowthEngine,
    fermentation: FermentationEngine,
    cell_removal: CellRemovalEngine,
    concentration: ConcentrationEngine,
    capture: CaptureEngine,
    conditioning: ConditioningEngine,
    polish: PolishEngine,
    final_form: FinalFormEngine,
    cmo: CmoContractEngine,
    allocation: AllocationEngine,
}

impl<C: ProcessConfigReader> PipelineOrchestrator<C> {
    pub fn new(cfg: C) -> Self {
        Self {
            cfg,
            seed_growth: SeedGrowthEngine::new(),
            fermentation: FermentationEngine::new(),
            cell_removal: CellRemovalEngine::new(),
            concentration: ConcentrationEngine::new(),
            capture: CaptureEngine::new(),
            conditioning: ConditioningEngine::new(),
            polish: PolishEngine::new(),
            final_form: FinalFormEngine::new(),
            cmo: CmoContractEngine::new(),
            allocation: AllocationEngine::new(),
        }
    }

    /// 执行完整管线
    ///
    /// # 流程
    /// 1. 种子扩培 → 发酵(生成性上游,无路线选择)
    /// 2. 除菌体 → 浓缩 → 捕获 → 调理 → 精制 → 成品形态
    ///    (每阶段: 覆写解析 → 路线选择 → 执行 → 守恒校验 → 入账)
    /// 3. CMO 合同计费(阶段工时聚合)→ CMO 费入台账
    /// 4. CMO/树脂合并分摊
    #[instrument(skip(self, scenario), fields(scenario = %scenario.name))]
    pub fn run(&self, scenario: &Scenario) -> Result<PipelineResult, EngineError> {
        let run_id = Uuid::new_v4();
        let mut ledger = CostLedger::new();
        let mut notes: Vec<AdvisoryNote> = Vec::new();
        let mut reports: Vec<StageReport> = Vec::new();
        let mut timings = CmoTimings::new();

        // ===== 上游生成性阶段 =====
        let seed_out = self.seed_growth.run(&self.cfg);
        self.book(StageId::SeedGrowth, None, &seed_out, &mut ledger, &mut timings, &mut reports)?;
        notes.extend(seed_out.notes.iter().cloned());

        let ferm_out = self.fermentation.run(&seed_out.product, &self.cfg);
        self.book(StageId::Fermentation, None, &ferm_out, &mut ledger, &mut timings, &mut reports)?;
        notes.extend(ferm_out.notes.iter().cloned());

        let mut stream = ferm_out.product;
        let mut handoff = ferm_out.handoff;

        // ===== 除菌体 =====
        let solids = self
            .cfg
            .get_f64(StageId::CellRemoval, config_keys::SOLIDS_FRACTION_PCT)
            .or_else(|| {
                self.cfg
                    .get_f64(StageId::Fermentation, "broth_solids_fraction_pct")
            });
        let out = {
            let snapshot = FeedSnapshot::from_stream(&stream, &handoff, solids);
            let (route, route_notes) = self.cell_removal.select_route(
                &snapshot,
                self.parse_override(StageId::CellRemoval)?,
                &self.cfg,
            );
            notes.extend(route_notes);
            let out = self
                .cell_removal
                .run(&stream, route, &self.cfg, &handoff)?;
            self.book(
                StageId::CellRemoval,
                Some(route.to_string()),
                &out,
                &mut ledger,
                &mut timings,
                &mut reports,
            )?;
            out
        };
        notes.extend(out.notes.iter().cloned());
        stream = out.product;
        handoff = out.handoff;

        // ===== 浓缩 =====
        let out = {
            let snapshot = FeedSnapshot::from_stream(&stream, &handoff, None);
            let (route, route_notes) = self.concentration.select_route(
                &snapshot,
                self.parse_override(StageId::Concentration)?,
                &self.cfg,
            );
            notes.extend(route_notes);
            let out = self
                .concentration
                .run(&stream, route, &self.cfg, &handoff)?;
            self.book(
                StageId::Concentration,
                Some(route.to_string()),
                &out,
                &mut ledger,
                &mut timings,
                &mut reports,
            )?;
            out
        };
        notes.extend(out.notes.iter().cloned());
        stream = out.product;
        handoff = out.handoff;

        // ===== 捕获 =====
        let out = {
            let snapshot = FeedSnapshot::from_stream(&stream, &handoff, None);
            let (route, route_notes) = self.capture.select_route(
                &snapshot,
                self.parse_override(StageId::Capture)?,
                &self.cfg,
            );
            notes.extend(route_notes);
            let out = self.capture.run(&stream, route, &self.cfg, &handoff)?;
            self.book(
                StageId::Capture,
                Some(route.to_string()),
                &out,
                &mut ledger,
                &mut timings,
                &mut reports,
            )?;
            out
        };
        notes.extend(out.notes.iter().cloned());
        stream = out.product;
        handoff = out.handoff;

        // ===== 调理 =====
        let out = {
            let snapshot = FeedSnapshot::from_stream(&stream, &handoff, None);
            let (route, route_notes) = self.conditioning.select_route(
                &snapshot,
                self.parse_override(StageId::Conditioning)?,
                &self.cfg,
            );
            notes.extend(route_notes);
            let out = self
                .conditioning
                .run(&stream, route, &self.cfg, &handoff)?;
            self.book(
                StageId::Conditioning,
                Some(route.to_string()),
                &out,
                &mut ledger,
                &mut timings,
                &mut reports,
            )?;
            out
        };
        notes.extend(out.notes.iter().cloned());
        stream = out.product;
        handoff = out.handoff;

        // ===== 精制 =====
        let out = {
            let snapshot = FeedSnapshot::from_stream(&stream, &handoff, None);
            let (route, route_notes) = self.polish.select_route(
                &snapshot,
                self.parse_override(StageId::Polish)?,
                &self.cfg,
            );
            notes.extend(route_notes);
            let out = self.polish.run(&stream, route, &self.cfg, &handoff)?;
            self.book(
                StageId::Polish,
                Some(route.to_string()),
                &out,
                &mut ledger,
                &mut timings,
                &mut reports,
            )?;
            out
        };
        notes.extend(out.notes.iter().cloned());
        stream = out.product;
        handoff = out.handoff;

        // ===== 成品形态 =====
        let out = {
            let snapshot = FeedSnapshot::from_stream(&stream, &handoff, None);
            let (route, route_notes) = self.final_form.select_route(
                &snapshot,
                self.parse_override(StageId::FinalForm)?,
                &self.cfg,
            );
            notes.extend(route_notes);
            let out = self
                .final_form
                .run(&stream, route, &self.cfg, &handoff)?;
            self.book(
                StageId::FinalForm,
                Some(route.to_string()),
                &out,
                &mut ledger,
                &mut timings,
                &mut reports,
            )?;
            out
        };
        notes.extend(out.notes.iter().cloned());
        stream = out.product;

        // ===== CMO 合同计费 =====
        // 物料口径 = 截至此刻台账全部工艺侧成本(CMO 费尚未入账)
        let materials_cost = ledger.total();
        let breakdown = self.cmo.compute_contract_costs(
            &timings,
            &scenario.rates,
            &scenario.discount,
            &scenario.campaign,
            materials_cost,
        );
        // CMO 费入台账(归口成品形态阶段,运行级费用)
        ledger.add(
            CostCategory::CmoStandardFee,
            breakdown.standard_batch_total_usd,
            StageId::FinalForm,
        )?;
        ledger.add(
            CostCategory::CmoCampaignFee,
            breakdown.setup_amortized_usd
                + breakdown.reservation_amortized_usd
                + breakdown.validation_amortized_usd,
            StageId::FinalForm,
        )?;
        ledger.add(
            CostCategory::CmoRetainerFee,
            breakdown.retainer_amortized_usd,
            StageId::FinalForm,
        )?;

        // ===== 合并分摊 =====
        let released_product_kg = stream.mass_of(components::PRODUCT);
        let per_batch_hours: f64 = reports.iter().map(|r| r.process_hours).sum();
        let allocation_basis = self
            .cfg
            .get_str(StageId::FinalForm, config_keys::ALLOCATION_BASIS)
            .map(|s| s.parse::<AllocationBasis>())
            .transpose()
            .map_err(|e| EngineError::configuration(StageId::FinalForm, e))?
            .unwrap_or_default();
        let resin_amortized = ledger.total_for(CostCategory::ResinConsumable);
        let resin_cleaning = self
            .cfg
            .get_f64_or(StageId::Capture, "resin_cleaning_cost_usd", 500.0)
            .max(0.0);
        let allocation_input = AllocationInput {
            basis: allocation_basis,
            batches_executed: scenario.batches_executed,
            batches_scheduled: scenario.batches_scheduled,
            good_batches_released: scenario.good_batches_released,
            mass_released_kg: released_product_kg * scenario.good_batches_released,
            total_process_hours: per_batch_hours * scenario.batches_executed,
            cmo_standard_fee_usd: breakdown.standard_batch_total_usd,
            cmo_campaign_fee_usd: breakdown.setup_amortized_usd
                + breakdown.reservation_amortized_usd
                + breakdown.validation_amortized_usd,
            cmo_annual_retainer_usd: scenario.rates.annual_retainer_usd,
            resin_amortized_usd: resin_amortized,
            resin_cleaning_usd: resin_cleaning,
        };
        let (allocation, allocation_notes) =
            self.allocation.compute_allocation(&allocation_input);
        notes.extend(allocation_notes);

        let totals_by_category = ledger.totals_by_category();
        info!(
            %run_id,
            released_product_kg,
            total_cost_usd = ledger.total(),
            note_count = notes.len(),
            "管线运行完成"
        );

        Ok(PipelineResult {
            run_id,
            scenario_name: scenario.name.clone(),
            final_stream: stream,
            released_product_kg,
            stage_reports: reports,
            ledger,
            totals_by_category,
            cmo_breakdown: breakdown,
            allocation,
            notes,
        })
    }

    /// 解析阶段路线覆写;非法覆写串 → 配置错误
    fn parse_override<R: std::str::FromStr<Err = String>>(
        &self,
        stage: StageId,
    ) -> Result<RouteOverride<R>, EngineError> {
        let raw = self.cfg.route_override(stage);
        RouteOverride::parse(raw.as_deref())
            .map_err(|e| EngineError::configuration(stage, e))
    }

    /// 阶段成本入台账、工时入计费汇总、生成审计报表
    fn book(
        &self,
        stage: StageId,
        route: Option<String>,
        out: &StageOutput,
        ledger: &mut CostLedger,
        timings: &mut CmoTimings,
        reports: &mut Vec<StageReport>,
    ) -> Result<(), EngineError> {
        let mut stage_cost = 0.0;
        for (category, amount) in &out.costs {
            ledger.add(*category, *amount, stage)?;
            stage_cost += amount;
        }
        timings.record(stage, out.process_hours);
        reports.push(StageReport {
            stage,
            route,
            recovery_fraction: out.handoff.recovery_fraction,
            process_hours: out.process_hours,
            cost_usd: stage_cost,
            pool_volume_l: out.handoff.pool_volume_l,
            product_kg: out.product.mass_of(components::PRODUCT),
        });
        Ok(())
    }
}

// 供二进制入口在独立情景间做对比扫描(情景间无共享状态)
pub fn run_scenarios<C: ProcessConfigReader>(
    orchestrator: &PipelineOrchestrator<C>,
    scenarios: &[Scenario],
) -> Result<Vec<PipelineResult>, EngineError> {
    scenarios.iter().map(|s| orchestrator.run(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryConfig;

    #[test]
    fn test_full_pipeline_runs_with_defaults() {
        let orchestrator = PipelineOrchestrator::new(InMemoryConfig::new());
        let result = orchestrator.run(&Scenario::default()).unwrap();
        assert_eq!(result.stage_reports.len(), StageId::ALL.len());
        assert!(result.released_product_kg > 0.0);
        assert!(result.ledger.total() > 0.0);
        // CMO 三类费用都已入账
        assert!(result
            .totals_by_category
            .contains_key(&CostCategory::CmoStandardFee));
        assert!(result
            .totals_by_category
            .contains_key(&CostCategory::CmoCampaignFee));
        assert!(result
            .totals_by_category
            .contains_key(&CostCategory::CmoRetainerFee));
        assert!(result.allocation.pooled_per_unit_usd.is_some());
    }

    #[test]
    fn test_invalid_route_override_is_configuration_error() {
        let cfg = InMemoryConfig::new().with(
            StageId::Capture,
            config_keys::ROUTE_OVERRIDE,
            "magnetic_beads",
        );
        let orchestrator = PipelineOrchestrator::new(cfg);
        let err = orchestrator.run(&Scenario::default()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
        assert_eq!(err.stage(), Some(StageId::Capture));
    }

    #[test]
    fn test_pipeline_is_deterministic_apart_from_run_id() {
        let orchestrator = PipelineOrchestrator::new(InMemoryConfig::new());
        let a = orchestrator.run(&Scenario::default()).unwrap();
        let b = orchestrator.run(&Scenario::default()).unwrap();
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.final_stream, b.final_stream);
        assert_eq!(a.notes, b.notes);
        assert!((a.ledger.total() - b.ledger.total()).abs() < 1e-9);
    }

    #[test]
    fn test_stage_reports_in_pipeline_order() {
        let orchestrator = PipelineOrchestrator::new(InMemoryConfig::new());
        let result = orchestrator.run(&Scenario::default()).unwrap();
        let stages: Vec<StageId> = result.stage_reports.iter().map(|r| r.stage).collect();
        assert_eq!(stages, StageId::ALL.to_vec());
    }

    #[test]
    fn test_product_mass_monotonically_decreases_downstream() {
        let orchestrator = PipelineOrchestrator::new(InMemoryConfig::new());
        let result = orchestrator.run(&Scenario::default()).unwrap();
        // 自发酵起,产品质量只减不增
        let masses: Vec<f64> = result
            .stage_reports
            .iter()
            .skip(1)
            .map(|r| r.product_kg)
            .collect();
        for pair in masses.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9);
        }
    }
}
