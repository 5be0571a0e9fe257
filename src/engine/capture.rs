// ==========================================
// 生物工艺技术经济评估系统 - 产品捕获阶段引擎
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 6. 捕获路线选择与执行
// 职责: 结合-洗脱层析 与 聚合物凝聚捕获 两个技术族
// 红线: 两族无论谁执行,都输出归一化交接记录,下游不感知技术族
// 红线: 显式指定的路线若配置非法(如树脂寿命≤0)→ 配置错误,立即上抛
// ==========================================

use crate::config::{config_keys, ProcessConfigReader};
use crate::domain::stream::{components, MaterialStream};
use crate::domain::types::{CaptureRoute, CostCategory, RouteOverride, StageId};
use crate::domain::HandoffRecord;
use crate::engine::error::EngineError;
use crate::engine::stage::{
    note_codes, verify_component_balance, AdvisoryNote, FeedSnapshot, StageOutput,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

// ==========================================
// CaptureEngine - 捕获引擎
// ==========================================
pub struct CaptureEngine;

impl CaptureEngine {
    pub fn new() -> Self {
        Self {}
    }

    // ==========================================
    // 路线选择
    // ==========================================

    /// 解析捕获路线
    ///
    /// # 启发式 (Process_Model_Spec 6.1,按声明顺序,首条命中即定)
    /// 1. 进料电导率 > bind_elute_conductivity_max (默认 30 mS/cm)
    ///    → PolymerCoacervate(高盐严重削弱结合容量)
    /// 2. 默认 → BindElute
    ///
    /// # 护栏(显式覆写同样执行)
    /// - BindElute 且电导率 > bind_elute_conductivity_max → 提示
    /// - PolymerCoacervate 且产品浓度 < coacervate_min_conc_g_per_l
    ///   (默认 1.0 g/L) → 提示(过稀凝聚效果差)
    pub fn select_route<C: ProcessConfigReader>(
        &self,
        feed: &FeedSnapshot,
        route_override: RouteOverride<CaptureRoute>,
        cfg: &C,
    ) -> (CaptureRoute, Vec<AdvisoryNote>) {
        let stage = StageId::Capture;
        let mut notes = Vec::new();
        let cond_max = cfg.get_f64_or(stage, "bind_elute_conductivity_max", 30.0);

        let route = match route_override {
            RouteOverride::Explicit(route) => route,
            RouteOverride::Auto => {
                if feed.conductivity_ms_cm.unwrap_or(0.0) > cond_max {
                    CaptureRoute::PolymerCoacervate
                } else {
                    CaptureRoute::BindElute
                }
            }
        };

        // 护栏: 无条件执行
        match route {
            CaptureRoute::BindElute => {
                if let Some(cond) = feed.conductivity_ms_cm {
                    if cond > cond_max {
                        notes.push(AdvisoryNote::guardrail(
                            stage,
                            format!(
                                "高电导率下结合容量严重衰减: {:.1} mS/cm > {:.1} mS/cm",
                                cond, cond_max
                            ),
                        ));
                    }
                }
            }
            CaptureRoute::PolymerCoacervate => {
                let min_conc = cfg.get_f64_or(stage, "coacervate_min_conc_g_per_l", 1.0);
                if let Some(conc) = feed.product_concentration_g_per_l {
                    if conc < min_conc {
                        notes.push(AdvisoryNote::guardrail(
                            stage,
                            format!(
                                "产品浓度过低,凝聚捕获效果差: {:.2} g/L < {:.2} g/L",
                                conc, min_conc
                            ),
                        ));
                    }
                }
            }
        }

        (route, notes)
    }

    // ==========================================
    // 阶段执行
    // ==========================================

    /// 执行捕获
    #[instrument(skip(self, stream_in, cfg, handoff_in))]
    pub fn run<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        route: CaptureRoute,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        match route {
            CaptureRoute::BindElute => self.run_bind_elute(stream_in, cfg, handoff_in),
            CaptureRoute::PolymerCoacervate => self.run_coacervate(stream_in, cfg, handoff_in),
        }
    }

    // ==========================================
    // 结合-洗脱层析
    // ==========================================

    /// 结合-洗脱层析执行器
    ///
    /// # 床体积定容 (Process_Model_Spec 6.2)
    /// - 有效 DBC = 基准 DBC × 电导率折减 × 杂质竞争折减 × 停留时间折减
    ///   - 电导率折减 = 1 − cond_derate_per_ms × 电导率,下限 0.2
    ///   - 杂质折减 = 1 − dna_derate_per_ppm × 核酸ppm,下限 0.5
    ///   - 停留时间折减 = min(1, 停留时间 / 基准停留时间)
    /// - 所需床体积 = 上样质量(g) / 有效DBC(g/L)
    /// - 周期数 = ceil(所需床体积 / 单柱床体积)
    ///
    /// # 缓冲液 (按床体积倍数 CV)
    /// 平衡/淋洗/洗脱/再生/在线清洗/再平衡 各步 CV 可配,
    /// 缓冲液体积 = ΣCV × 单柱床体积 × 周期数
    ///
    /// # 树脂摊销
    /// 树脂成本 = 单柱床体积 × 单价 / 周期寿命 × 本批周期数
    ///
    /// # 配置键 (capture.*)
    /// - resin_dbc_g_per_l (默认 40) / resin_cost_per_l (默认 1500)
    /// - resin_cycle_life (默认 100;显式配置 ≤0 → 配置错误)
    /// - column_volume_l (默认 200)
    /// - cond_derate_per_ms (默认 0.01) / dna_derate_per_ppm (默认 0.001)
    /// - residence_time_min (默认 4) / residence_time_ref_min (默认 4)
    /// - equilibration_cv 3 / wash_cv 5 / elution_cv 3 / strip_cv 2
    ///   / cip_cv 3 / reequilibration_cv 3
    /// - buffer_cost_per_l_usd (默认 0.8)
    /// - capture_yield (默认 0.95)
    /// - cycle_hours (默认 4)
    /// - elution_conductivity_ms_cm (默认 45) / buffer_exchange_cond_max (默认 10)
    fn run_bind_elute<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::Capture;
        let mut notes = Vec::new();

        let cycle_life = cfg.get_f64_or(stage, config_keys::RESIN_CYCLE_LIFE, 100.0);
        if cycle_life <= 0.0 {
            return Err(EngineError::configuration(
                stage,
                format!("resin_cycle_life={} 无法摊销树脂成本", cycle_life),
            ));
        }

        let product_in = stream_in.mass_of(components::PRODUCT);
        let load_mass_g = product_in * 1000.0;

        // 有效 DBC
        let base_dbc = cfg
            .get_f64_or(stage, config_keys::RESIN_DBC_G_PER_L, 40.0)
            .max(0.0);
        let cond = match handoff_in.conductivity_ms_cm {
            Some(v) => v,
            None => {
                notes.push(AdvisoryNote::assumed_default(
                    stage,
                    "进料电导率缺失,按 10 mS/cm 估算结合容量",
                ));
                10.0
            }
        };
        let cond_penalty =
            (1.0 - cfg.get_f64_or(stage, "cond_derate_per_ms", 0.01) * cond).max(0.2);
        let dna_ppm = handoff_in.dna_ppm.unwrap_or(0.0);
        let dna_penalty =
            (1.0 - cfg.get_f64_or(stage, "dna_derate_per_ppm", 0.001) * dna_ppm).max(0.5);
        let rt = cfg.get_f64_or(stage, "residence_time_min", 4.0);
        let rt_ref = cfg.get_f64_or(stage, "residence_time_ref_min", 4.0).max(0.1);
        let rt_factor = (rt / rt_ref).min(1.0).max(0.0);
        let effective_dbc = (base_dbc * cond_penalty * dna_penalty * rt_factor).max(1.0);

        // 床体积与周期
        let required_bed_l = load_mass_g / effective_dbc;
        let column_volume_l = cfg.get_f64_or(stage, "column_volume_l", 200.0).max(1.0);
        let cycles = (required_bed_l / column_volume_l).ceil().max(1.0);

        // 缓冲液计划: 各步 CV 倍数求和
        let cv_schedule = [
            ("equilibration_cv", 3.0),
            ("wash_cv", 5.0),
            ("elution_cv", 3.0),
            ("strip_cv", 2.0),
            ("cip_cv", 3.0),
            ("reequilibration_cv", 3.0),
        ];
        let total_cv: f64 = cv_schedule
            .iter()
            .map(|(key, default)| cfg.get_f64_or(stage, key, *default).max(0.0))
            .sum();
        let buffer_volume_l = total_cv * column_volume_l * cycles;
        let buffer_cost =
            cfg.get_f64_or(stage, "buffer_cost_per_l_usd", 0.8).max(0.0) * buffer_volume_l;

        // 树脂摊销
        let resin_cost_per_l = cfg
            .get_f64_or(stage, config_keys::RESIN_COST_PER_L, 1500.0)
            .max(0.0);
        let resin_cost = column_volume_l * resin_cost_per_l / cycle_life * cycles;

        // 收率与洗脱池
        let capture_yield = cfg.get_f64_or(stage, "capture_yield", 0.95).clamp(0.0, 1.0);
        let product_out = product_in * capture_yield;
        let product_lost = product_in - product_out;
        let elution_cv = cfg.get_f64_or(stage, "elution_cv", 3.0).max(0.0);
        let eluate_volume_l = elution_cv * column_volume_l * cycles;

        // 洗脱池: 产品 + 缓冲液水相;核酸绝大部分随流穿排走
        let dna_in = stream_in.mass_of(components::DNA);
        let dna_clearance = cfg.get_f64_or(stage, "dna_clearance", 0.99).clamp(0.0, 1.0);
        let dna_out = dna_in * (1.0 - dna_clearance);
        let mut product_map = BTreeMap::new();
        product_map.insert(components::PRODUCT.to_string(), product_out);
        product_map.insert(components::DNA.to_string(), dna_out);
        product_map.insert(
            components::WATER.to_string(),
            (eluate_volume_l - product_out - dna_out).max(0.0),
        );
        let (product, _) = MaterialStream::from_components(product_map, 1.0, 25.0, 1.0);

        // 流穿废弃: 未结合产品、菌体残余、被清除的核酸与原水相
        let mut waste_map = BTreeMap::new();
        waste_map.insert(components::PRODUCT.to_string(), product_lost);
        waste_map.insert(
            components::CELLS.to_string(),
            stream_in.mass_of(components::CELLS),
        );
        waste_map.insert(components::DNA.to_string(), dna_in - dna_out);
        waste_map.insert(
            components::WATER.to_string(),
            stream_in.mass_of(components::WATER),
        );
        let (waste, _) = MaterialStream::from_components(waste_map, 1.0, 25.0, 1.0);

        verify_component_balance(stage, stream_in, &product, &waste)?;

        let cycle_hours = cfg.get_f64_or(stage, "cycle_hours", 4.0).max(0.0);
        let hours = cycle_hours * cycles;

        // 归一化交接记录: 洗脱液高盐 → 需要缓冲液置换
        let elution_cond = cfg.get_f64_or(stage, "elution_conductivity_ms_cm", 45.0);
        let cond_threshold = cfg.get_f64_or(stage, "buffer_exchange_cond_max", 10.0);
        let handoff = HandoffRecord {
            stage,
            pool_volume_l: product.volume_l(),
            product_concentration_g_per_l: product.concentration_g_per_l(components::PRODUCT),
            conductivity_ms_cm: Some(elution_cond),
            ph: Some(cfg.get_f64_or(stage, "elution_ph", 4.5)),
            dna_ppm: ppm_of(&product, components::DNA),
            polymer_ppm: None,
            recovery_fraction: capture_yield,
            needs_buffer_exchange: elution_cond > cond_threshold,
            needs_polish_filtration: false,
        };

        debug!(
            effective_dbc,
            required_bed_l, cycles, buffer_volume_l, "结合-洗脱定容完成"
        );

        Ok(StageOutput {
            product,
            waste,
            handoff,
            costs: vec![
                (CostCategory::ResinConsumable, resin_cost),
                (CostCategory::BufferReagent, buffer_cost),
            ],
            process_hours: hours,
            notes,
        })
    }

    // ==========================================
    // 聚合物凝聚捕获
    // ==========================================

    /// 聚合物凝聚捕获执行器
    ///
    /// # 规则 (Process_Model_Spec 6.3)
    /// - 聚合物投加量 = 上样产品质量 × 电荷比规则 charge_ratio (默认 0.10 kg/kg)
    /// - 总收率 = capture_yield (默认 0.90) × elution_yield (默认 0.95)
    /// - 聚合物净耗 = 投加量 × (1 − polymer_recovery + bleed_fraction)
    ///   (回收循环使用,渗漏损失计入净耗)
    /// - 产品池残留聚合物 ppm 超过 polymer_residue_limit_ppm (默认 30)
    ///   → needs_polish_filtration = true
    ///
    /// # 配置键 (capture.*)
    /// - charge_ratio / capture_yield_coacervate / elution_yield
    /// - polymer_cost_per_kg (默认 20) / polymer_recovery (默认 0.8)
    /// - bleed_fraction (默认 0.05) / residual_carryover_fraction (默认 0.002)
    /// - coacervate_pool_conc_g_per_l (默认 50)
    /// - coacervate_hours (默认 6)
    fn run_coacervate<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::Capture;
        let mut notes = Vec::new();

        let product_in = stream_in.mass_of(components::PRODUCT);
        let charge_ratio = cfg.get_f64_or(stage, "charge_ratio", 0.10).max(0.0);
        let polymer_dose_kg = product_in * charge_ratio;

        let capture_yield = cfg
            .get_f64_or(stage, "capture_yield_coacervate", 0.90)
            .clamp(0.0, 1.0);
        let elution_yield = cfg.get_f64_or(stage, "elution_yield", 0.95).clamp(0.0, 1.0);
        let overall_yield = capture_yield * elution_yield;
        let product_out = product_in * overall_yield;
        let product_lost = product_in - product_out;

        // 聚合物经济: 回收循环使用,净耗 = 未回收 + 渗漏
        let polymer_recovery = cfg
            .get_f64_or(stage, "polymer_recovery", 0.8)
            .clamp(0.0, 1.0);
        let bleed_fraction = cfg
            .get_f64_or(stage, "bleed_fraction", 0.05)
            .clamp(0.0, 1.0);
        let polymer_consumed_kg = polymer_dose_kg * (1.0 - polymer_recovery + bleed_fraction);
        let polymer_cost = cfg.get_f64_or(stage, "polymer_cost_per_kg", 20.0).max(0.0)
            * polymer_consumed_kg;

        // 产品池: 按洗脱浓度定体积,携带微量聚合物残留
        let pool_conc = cfg
            .get_f64_or(stage, "coacervate_pool_conc_g_per_l", 50.0)
            .max(1.0);
        let pool_volume_l = product_out * 1000.0 / pool_conc;
        let residual_polymer_kg =
            polymer_dose_kg * cfg.get_f64_or(stage, "residual_carryover_fraction", 0.002).max(0.0);

        let dna_in = stream_in.mass_of(components::DNA);
        let dna_clearance = cfg
            .get_f64_or(stage, "dna_clearance_coacervate", 0.9)
            .clamp(0.0, 1.0);
        let dna_out = dna_in * (1.0 - dna_clearance);

        let mut product_map = BTreeMap::new();
        product_map.insert(components::PRODUCT.to_string(), product_out);
        product_map.insert(components::POLYMER.to_string(), residual_polymer_kg);
        product_map.insert(components::DNA.to_string(), dna_out);
        product_map.insert(
            components::WATER.to_string(),
            (pool_volume_l - product_out - residual_polymer_kg - dna_out).max(0.0),
        );
        let (product, _) = MaterialStream::from_components(product_map, 1.0, 25.0, 1.0);

        let mut waste_map = BTreeMap::new();
        waste_map.insert(components::PRODUCT.to_string(), product_lost);
        waste_map.insert(
            components::CELLS.to_string(),
            stream_in.mass_of(components::CELLS),
        );
        waste_map.insert(components::DNA.to_string(), dna_in - dna_out);
        waste_map.insert(
            components::WATER.to_string(),
            stream_in.mass_of(components::WATER),
        );
        waste_map.insert(
            "loss:polymer_bleed".to_string(),
            polymer_dose_kg * bleed_fraction,
        );
        let (waste, _) = MaterialStream::from_components(waste_map, 1.0, 25.0, 1.0);

        verify_component_balance(stage, stream_in, &product, &waste)?;

        // 残留聚合物判定
        let polymer_ppm = ppm_of(&product, components::POLYMER);
        let residue_limit = cfg.get_f64_or(stage, config_keys::POLYMER_RESIDUE_LIMIT_PPM, 30.0);
        let needs_polish = polymer_ppm.unwrap_or(0.0) > residue_limit;
        if needs_polish {
            notes.push(AdvisoryNote::new(
                stage,
                note_codes::GUARDRAIL,
                format!(
                    "残留聚合物 {:.1} ppm 超过限值 {:.1} ppm,需下游精制",
                    polymer_ppm.unwrap_or(0.0),
                    residue_limit
                ),
            ));
        }

        let handoff = HandoffRecord {
            stage,
            pool_volume_l: product.volume_l(),
            product_concentration_g_per_l: product.concentration_g_per_l(components::PRODUCT),
            conductivity_ms_cm: Some(cfg.get_f64_or(stage, "coacervate_pool_cond_ms_cm", 8.0)),
            ph: handoff_in.ph,
            dna_ppm: ppm_of(&product, components::DNA),
            polymer_ppm,
            recovery_fraction: overall_yield,
            needs_buffer_exchange: false,
            needs_polish_filtration: needs_polish,
        };

        debug!(polymer_dose_kg, polymer_consumed_kg, "凝聚捕获完成");

        Ok(StageOutput {
            product,
            waste,
            handoff,
            costs: vec![(CostCategory::BufferReagent, polymer_cost)],
            process_hours: cfg.get_f64_or(stage, "coacervate_hours", 6.0).max(0.0),
            notes,
        })
    }
}

impl Default for CaptureEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 组分含量 (ppm,相对总质量)
fn ppm_of(stream: &MaterialStream, component: &str) -> Option<f64> {
    let total = stream.total_mass_kg();
    if total > 0.0 {
        Some(stream.mass_of(component) / total * 1e6)
    } else {
        None
    }
}
