// ==========================================
// 生物工艺技术经济评估系统 - 上游阶段执行器
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 3.1 种子扩培 / 3.2 发酵
// 职责: 种子扩培与发酵的产出/成本模型
// 说明: 上游为生成性阶段(由培养基增殖产生质量),
//       下游分离阶段的组分守恒契约自除菌体起生效
// ==========================================

use crate::config::ProcessConfigReader;
use crate::domain::stream::{components, MaterialStream};
use crate::domain::types::{CostCategory, StageId};
use crate::domain::HandoffRecord;
use crate::engine::stage::{note_codes, AdvisoryNote, StageOutput};
use std::collections::BTreeMap;
use tracing::debug;

// ==========================================
// SeedGrowthEngine - 种子扩培
// ==========================================
pub struct SeedGrowthEngine;

impl SeedGrowthEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// 执行种子扩培
    ///
    /// # 规则
    /// - 逐级扩培 train_stages 级(默认 3 级),每级固定时长与培养基成本
    /// - 产出接种物流: 接种物干重 = inoculum_mass_kg(默认 5 kg)
    ///
    /// # 配置键 (seed_growth.*)
    /// - train_stages: 扩培级数,默认 3
    /// - hours_per_stage: 每级时长(h),默认 24
    /// - media_cost_per_stage_usd: 每级培养基成本,默认 800
    /// - inoculum_mass_kg: 接种物干重,默认 5
    pub fn run<C: ProcessConfigReader>(&self, cfg: &C) -> StageOutput {
        let stage = StageId::SeedGrowth;
        let train_stages = cfg.get_f64_or(stage, "train_stages", 3.0).max(1.0);
        let hours_per_stage = cfg.get_f64_or(stage, "hours_per_stage", 24.0).max(0.0);
        let media_cost_per_stage = cfg
            .get_f64_or(stage, "media_cost_per_stage_usd", 800.0)
            .max(0.0);
        let inoculum_mass_kg = cfg.get_f64_or(stage, "inoculum_mass_kg", 5.0).max(0.0);

        let mut map = BTreeMap::new();
        map.insert(components::CELLS.to_string(), inoculum_mass_kg);
        map.insert(components::WATER.to_string(), inoculum_mass_kg * 19.0);
        let (product, _) = MaterialStream::from_components(map, 1.0, 30.0, 1.0);

        let pool_volume_l = product.volume_l();
        debug!(stage = %stage, train_stages, pool_volume_l, "种子扩培完成");

        StageOutput {
            handoff: HandoffRecord::initial(stage, pool_volume_l),
            product,
            waste: MaterialStream::empty(),
            costs: vec![(
                CostCategory::RawMaterials,
                media_cost_per_stage * train_stages,
            )],
            process_hours: hours_per_stage * train_stages,
            notes: Vec::new(),
        }
    }
}

impl Default for SeedGrowthEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ==========================================
// FermentationEngine - 发酵
// ==========================================
pub struct FermentationEngine;

impl FermentationEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// 执行发酵
    ///
    /// # 规则
    /// - 产品质量 = 滴度 × 工作体积
    /// - 菌体质量 = 固含量%v/v × 体积 × 菌体堆积密度(取 1.05 kg/L)
    /// - 水相 = 总质量 − 产品 − 菌体 − 核酸(不足时钳 0 并记说明)
    ///
    /// # 配置键 (fermentation.*)
    /// - working_volume_l: 工作体积,默认 10_000
    /// - titer_g_per_l: 产品滴度,默认 50
    /// - broth_density_kg_per_l: 发酵液密度,默认 1.02
    /// - broth_solids_fraction_pct: 固含量 %v/v,默认 2.0
    /// - dna_release_ppm: 核酸释放量(相对发酵液,ppm),默认 50
    /// - media_cost_per_l_usd: 培养基单位成本,默认 0.5
    /// - utility_cost_per_l_usd: 公用工程单位成本,默认 0.05
    /// - fermentation_hours: 发酵时长,默认 72
    pub fn run<C: ProcessConfigReader>(
        &self,
        _inoculum: &MaterialStream,
        cfg: &C,
    ) -> StageOutput {
        let stage = StageId::Fermentation;
        let mut notes = Vec::new();

        let volume_l = cfg.get_f64_or(stage, "working_volume_l", 10_000.0);
        let volume_l = if volume_l > 0.0 {
            volume_l
        } else {
            notes.push(AdvisoryNote::assumed_default(
                stage,
                "工作体积缺失或非正,按默认 10000 L 继续",
            ));
            10_000.0
        };
        let titer_g_per_l = cfg.get_f64_or(stage, "titer_g_per_l", 50.0).max(0.0);
        let density = cfg.get_f64_or(stage, "broth_density_kg_per_l", 1.02);
        let solids_pct = cfg
            .get_f64_or(stage, "broth_solids_fraction_pct", 2.0)
            .max(0.0);
        let dna_ppm = cfg.get_f64_or(stage, "dna_release_ppm", 50.0).max(0.0);

        let total_mass_kg = volume_l * density;
        let product_kg = titer_g_per_l * volume_l / 1000.0;
        let cells_kg = solids_pct / 100.0 * volume_l * 1.05;
        let dna_kg = dna_ppm * 1e-6 * total_mass_kg;
        let water_kg = total_mass_kg - product_kg - cells_kg - dna_kg;
        if water_kg < 0.0 {
            notes.push(AdvisoryNote::new(
                stage,
                note_codes::CLAMPED,
                "溶质合计超过发酵液总质量,水相钳制为 0",
            ));
        }

        let mut map = BTreeMap::new();
        map.insert(components::PRODUCT.to_string(), product_kg);
        map.insert(components::CELLS.to_string(), cells_kg);
        map.insert(components::DNA.to_string(), dna_kg);
        map.insert(components::WATER.to_string(), water_kg.max(0.0));
        let (broth, _) = MaterialStream::from_components(map, density, 32.0, 1.0);

        let media_cost = cfg.get_f64_or(stage, "media_cost_per_l_usd", 0.5).max(0.0) * volume_l;
        let utility_cost = cfg
            .get_f64_or(stage, "utility_cost_per_l_usd", 0.05)
            .max(0.0)
            * volume_l;
        let hours = cfg.get_f64_or(stage, "fermentation_hours", 72.0).max(0.0);

        let handoff = HandoffRecord {
            stage,
            pool_volume_l: broth.volume_l(),
            product_concentration_g_per_l: broth.concentration_g_per_l(components::PRODUCT),
            conductivity_ms_cm: Some(cfg.get_f64_or(stage, "broth_conductivity_ms_cm", 15.0)),
            ph: Some(cfg.get_f64_or(stage, "broth_ph", 6.8)),
            dna_ppm: Some(dna_ppm),
            polymer_ppm: None,
            recovery_fraction: 1.0,
            needs_buffer_exchange: false,
            needs_polish_filtration: false,
        };

        debug!(
            stage = %stage,
            volume_l,
            product_kg,
            cells_kg,
            "发酵完成"
        );

        StageOutput {
            product: broth,
            waste: MaterialStream::empty(),
            handoff,
            costs: vec![
                (CostCategory::RawMaterials, media_cost),
                (CostCategory::Utilities, utility_cost),
            ],
            process_hours: hours,
            notes,
        }
    }
}

impl Default for FermentationEngine {
    fn default() -> Self {
        Self::new()
    }
}
