// ==========================================
// 生物工艺技术经济评估系统 - 浓缩阶段引擎
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 5. 浓缩路线选择与执行
// 职责: VRR 驱动的浓缩模型(批式超滤/单程切向流/降膜蒸发)
// 红线: VRR 与洗滤倍数超出验证范围只提示,不否决
// ==========================================

use crate::config::{config_keys, ProcessConfigReader};
use crate::domain::stream::{components, MaterialStream};
use crate::domain::types::{ConcentrationRoute, CostCategory, RouteOverride, StageId};
use crate::domain::HandoffRecord;
use crate::engine::error::EngineError;
use crate::engine::stage::{
    note_codes, verify_component_balance, AdvisoryNote, FeedSnapshot, StageOutput,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

// ==========================================
// ConcentrationEngine - 浓缩引擎
// ==========================================
pub struct ConcentrationEngine;

impl ConcentrationEngine {
    pub fn new() -> Self {
        Self {}
    }

    // ==========================================
    // 路线选择
    // ==========================================

    /// 解析浓缩路线
    ///
    /// # 启发式 (Process_Model_Spec 5.1,按声明顺序,首条命中即定)
    /// 1. product_heat_stable 标志 → Evaporator
    /// 2. 进料体积 ≥ single_pass_volume_cutoff_l (默认 15000 L) → SinglePassTff
    /// 3. 默认 → BatchUf
    ///
    /// # 护栏(显式覆写同样执行)
    /// - target_vrr > vrr_guard_max (默认 20) → 提示(超出验证浓缩倍数)
    /// - diavolumes > diavolume_guard_max (默认 12) → 提示(洗滤倍数过高)
    pub fn select_route<C: ProcessConfigReader>(
        &self,
        feed: &FeedSnapshot,
        route_override: RouteOverride<ConcentrationRoute>,
        cfg: &C,
    ) -> (ConcentrationRoute, Vec<AdvisoryNote>) {
        let stage = StageId::Concentration;
        let mut notes = Vec::new();

        let route = match route_override {
            RouteOverride::Explicit(route) => route,
            RouteOverride::Auto => {
                let heat_stable = cfg.get_bool_or(stage, "product_heat_stable", false);
                let volume_cutoff =
                    cfg.get_f64_or(stage, "single_pass_volume_cutoff_l", 15_000.0);
                if heat_stable {
                    ConcentrationRoute::Evaporator
                } else if feed.volume_l.unwrap_or(0.0) >= volume_cutoff {
                    ConcentrationRoute::SinglePassTff
                } else {
                    ConcentrationRoute::BatchUf
                }
            }
        };

        // 护栏: 无条件执行
        let target_vrr = cfg.get_f64_or(stage, config_keys::TARGET_VRR, 10.0);
        let vrr_guard = cfg.get_f64_or(stage, config_keys::VRR_GUARD_MAX, 20.0);
        if target_vrr > vrr_guard {
            notes.push(AdvisoryNote::guardrail(
                stage,
                format!(
                    "浓缩倍数超出验证范围: VRR={:.1} > guard={:.1}",
                    target_vrr, vrr_guard
                ),
            ));
        }
        let diavolumes = cfg.get_f64_or(stage, config_keys::DIAVOLUMES, 0.0);
        let dv_guard = cfg.get_f64_or(stage, config_keys::DIAVOLUME_GUARD_MAX, 12.0);
        if diavolumes > dv_guard {
            notes.push(AdvisoryNote::guardrail(
                stage,
                format!(
                    "洗滤倍数超出验证范围: DV={:.1} > guard={:.1}",
                    diavolumes, dv_guard
                ),
            ));
        }

        (route, notes)
    }

    // ==========================================
    // 阶段执行
    // ==========================================

    /// 执行浓缩
    ///
    /// # 规则 (Process_Model_Spec 5.2)
    /// - 输出体积 = 进料体积 / target_vrr (默认 VRR=10)
    /// - 产品截留率: BatchUf 0.97 / SinglePassTff 0.98 / Evaporator 0.99
    ///   (透过/冷凝侧损失随废弃流显式入账)
    /// - 洗滤: 缓冲液用量 = DV × 截留液体积;电导率按 exp(−DV) 衰减
    /// - 核酸随产品侧截留
    ///
    /// # 配置键 (concentration.*)
    /// - target_vrr / diavolumes
    /// - uf_recovery / sptff_recovery / evaporator_recovery
    /// - membrane_cost_per_l_usd (默认 0.025,按进料体积)
    /// - buffer_cost_per_l_usd (默认 0.5)
    /// - evaporator_utility_cost_per_l_usd (默认 0.03,按蒸发体积)
    /// - uf_rate_l_per_h / sptff_rate_l_per_h / evaporator_rate_l_per_h:
    ///   默认 1000 / 2000 / 1500
    #[instrument(skip(self, stream_in, cfg, handoff_in))]
    pub fn run<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        route: ConcentrationRoute,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::Concentration;
        let mut notes = Vec::new();

        let feed_volume_l = stream_in.volume_l();
        let target_vrr = cfg.get_f64_or(stage, config_keys::TARGET_VRR, 10.0);
        let target_vrr = if target_vrr >= 1.0 {
            target_vrr
        } else {
            notes.push(AdvisoryNote::assumed_default(
                stage,
                "target_vrr < 1 无物理意义,按 1.0(不浓缩)继续",
            ));
            1.0
        };
        let diavolumes = cfg.get_f64_or(stage, config_keys::DIAVOLUMES, 0.0).max(0.0);

        let recovery = match route {
            ConcentrationRoute::BatchUf => cfg.get_f64_or(stage, "uf_recovery", 0.97),
            ConcentrationRoute::SinglePassTff => cfg.get_f64_or(stage, "sptff_recovery", 0.98),
            ConcentrationRoute::Evaporator => {
                cfg.get_f64_or(stage, "evaporator_recovery", 0.99)
            }
        }
        .clamp(0.0, 1.0);

        let product_in = stream_in.mass_of(components::PRODUCT);
        let cells_in = stream_in.mass_of(components::CELLS);
        let dna_in = stream_in.mass_of(components::DNA);
        let water_in = stream_in.mass_of(components::WATER);

        // 体积簿记: 截留液体积 = 进料 / VRR,被移除的水随透过/冷凝侧离开
        let retentate_volume_l = feed_volume_l / target_vrr;
        let water_removed = (feed_volume_l - retentate_volume_l).max(0.0).min(water_in);

        let product_out = product_in * recovery;
        let product_lost = product_in - product_out;

        let mut product_map = BTreeMap::new();
        product_map.insert(components::PRODUCT.to_string(), product_out);
        product_map.insert(components::CELLS.to_string(), cells_in);
        product_map.insert(components::DNA.to_string(), dna_in);
        product_map.insert(components::WATER.to_string(), water_in - water_removed);
        let (product, clamped) = MaterialStream::from_components(product_map, 1.0, 25.0, 1.0);
        for name in clamped {
            notes.push(AdvisoryNote::new(
                stage,
                note_codes::CLAMPED,
                format!("产品流组分 {} 为负,已钳制为 0", name),
            ));
        }

        let mut waste_map = BTreeMap::new();
        waste_map.insert(components::WATER.to_string(), water_removed);
        waste_map.insert(components::PRODUCT.to_string(), product_lost);
        let (waste, _) = MaterialStream::from_components(waste_map, 1.0, 25.0, 1.0);

        verify_component_balance(stage, stream_in, &product, &waste)?;

        // 成本与工时
        let mut costs = Vec::new();
        let buffer_volume_l = diavolumes * retentate_volume_l;
        if buffer_volume_l > 0.0 {
            let buffer_unit = cfg.get_f64_or(stage, "buffer_cost_per_l_usd", 0.5).max(0.0);
            costs.push((CostCategory::BufferReagent, buffer_unit * buffer_volume_l));
        }
        let hours = match route {
            ConcentrationRoute::BatchUf | ConcentrationRoute::SinglePassTff => {
                let (unit_key, rate_key, default_rate) = match route {
                    ConcentrationRoute::BatchUf => {
                        ("membrane_cost_per_l_usd", "uf_rate_l_per_h", 1000.0)
                    }
                    _ => ("membrane_cost_per_l_usd", "sptff_rate_l_per_h", 2000.0),
                };
                let unit = cfg.get_f64_or(stage, unit_key, 0.025).max(0.0);
                costs.push((
                    CostCategory::MembraneConsumable,
                    unit * feed_volume_l.max(0.0),
                ));
                let rate = cfg.get_f64_or(stage, rate_key, default_rate);
                if rate > 0.0 {
                    (feed_volume_l + buffer_volume_l) / rate
                } else {
                    0.0
                }
            }
            ConcentrationRoute::Evaporator => {
                let unit = cfg
                    .get_f64_or(stage, "evaporator_utility_cost_per_l_usd", 0.03)
                    .max(0.0);
                costs.push((CostCategory::Utilities, unit * water_removed));
                let rate = cfg.get_f64_or(stage, "evaporator_rate_l_per_h", 1500.0);
                if rate > 0.0 {
                    feed_volume_l / rate
                } else {
                    0.0
                }
            }
        };

        // 洗滤后电导率按 exp(−DV) 衰减
        let conductivity_out = handoff_in
            .conductivity_ms_cm
            .map(|c| c * (-diavolumes).exp());

        let handoff = HandoffRecord {
            stage,
            pool_volume_l: product.volume_l(),
            product_concentration_g_per_l: product.concentration_g_per_l(components::PRODUCT),
            conductivity_ms_cm: conductivity_out,
            ph: handoff_in.ph,
            dna_ppm: handoff_in.dna_ppm,
            polymer_ppm: handoff_in.polymer_ppm,
            recovery_fraction: if product_in > 0.0 {
                product_out / product_in
            } else {
                1.0
            },
            needs_buffer_exchange: false,
            needs_polish_filtration: handoff_in.needs_polish_filtration,
        };

        debug!(
            stage = %stage,
            target_vrr,
            retentate_volume_l,
            "浓缩完成"
        );

        Ok(StageOutput {
            product,
            waste,
            handoff,
            costs,
            process_hours: hours,
            notes,
        })
    }
}

impl Default for ConcentrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryConfig;

    fn feed(product_kg: f64, water_kg: f64) -> MaterialStream {
        let mut map = BTreeMap::new();
        map.insert(components::PRODUCT.to_string(), product_kg);
        map.insert(components::WATER.to_string(), water_kg);
        MaterialStream::from_components(map, 1.0, 25.0, 1.0).0
    }

    fn snapshot(volume_l: f64) -> FeedSnapshot {
        FeedSnapshot {
            volume_l: Some(volume_l),
            solids_fraction_pct: None,
            conductivity_ms_cm: Some(15.0),
            product_concentration_g_per_l: Some(5.0),
            polymer_ppm: None,
            needs_buffer_exchange: false,
            needs_polish_filtration: false,
        }
    }

    #[test]
    fn test_default_route_is_batch_uf() {
        let engine = ConcentrationEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, notes) = engine.select_route(&snapshot(8000.0), RouteOverride::Auto, &cfg);
        assert_eq!(route, ConcentrationRoute::BatchUf);
        assert!(notes.is_empty());
    }

    #[test]
    fn test_large_volume_selects_single_pass() {
        let engine = ConcentrationEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, _) = engine.select_route(&snapshot(18_000.0), RouteOverride::Auto, &cfg);
        assert_eq!(route, ConcentrationRoute::SinglePassTff);
    }

    #[test]
    fn test_vrr_guardrail_fires_even_for_explicit_override() {
        let engine = ConcentrationEngine::new();
        let cfg = InMemoryConfig::new().with(StageId::Concentration, config_keys::TARGET_VRR, 30.0);
        let (_, notes) = engine.select_route(
            &snapshot(8000.0),
            RouteOverride::Explicit(ConcentrationRoute::BatchUf),
            &cfg,
        );
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].code, note_codes::GUARDRAIL);
    }

    #[test]
    fn test_diavolume_guardrail() {
        let engine = ConcentrationEngine::new();
        let cfg = InMemoryConfig::new().with(StageId::Concentration, config_keys::DIAVOLUMES, 15.0);
        let (_, notes) = engine.select_route(&snapshot(8000.0), RouteOverride::Auto, &cfg);
        assert!(notes.iter().any(|n| n.message.contains("洗滤倍数")));
    }

    #[test]
    fn test_volume_reduced_by_vrr_and_mass_conserved() {
        let engine = ConcentrationEngine::new();
        let cfg = InMemoryConfig::new().with(StageId::Concentration, config_keys::TARGET_VRR, 10.0);
        let stream = feed(500.0, 9500.0);
        let handoff = HandoffRecord::initial(StageId::CellRemoval, stream.volume_l());
        let out = engine
            .run(&stream, ConcentrationRoute::BatchUf, &cfg, &handoff)
            .unwrap();
        // 体积缩小约 10 倍
        assert!(out.product.volume_l() < stream.volume_l() / 5.0);
        // 组分守恒
        let total_out = out.product.total_mass_kg() + out.waste.total_mass_kg();
        assert!(total_out <= stream.total_mass_kg() + 1e-6);
        // 浓度上升
        let c_in = stream.concentration_g_per_l(components::PRODUCT).unwrap();
        let c_out = out
            .product
            .concentration_g_per_l(components::PRODUCT)
            .unwrap();
        assert!(c_out > c_in * 5.0);
    }

    #[test]
    fn test_diafiltration_books_buffer_cost_and_drops_conductivity() {
        let engine = ConcentrationEngine::new();
        let cfg = InMemoryConfig::new().with(StageId::Concentration, config_keys::DIAVOLUMES, 5.0);
        let stream = feed(100.0, 1900.0);
        let mut handoff = HandoffRecord::initial(StageId::CellRemoval, stream.volume_l());
        handoff.conductivity_ms_cm = Some(20.0);
        let out = engine
            .run(&stream, ConcentrationRoute::BatchUf, &cfg, &handoff)
            .unwrap();
        let buffer: f64 = out
            .costs
            .iter()
            .filter(|(c, _)| *c == CostCategory::BufferReagent)
            .map(|(_, v)| *v)
            .sum();
        assert!(buffer > 0.0);
        assert!(out.handoff.conductivity_ms_cm.unwrap() < 1.0);
    }

    #[test]
    fn test_invalid_vrr_falls_back_with_note() {
        let engine = ConcentrationEngine::new();
        let cfg = InMemoryConfig::new().with(StageId::Concentration, config_keys::TARGET_VRR, 0.5);
        let stream = feed(100.0, 900.0);
        let handoff = HandoffRecord::initial(StageId::CellRemoval, stream.volume_l());
        let out = engine
            .run(&stream, ConcentrationRoute::BatchUf, &cfg, &handoff)
            .unwrap();
        assert!(out.notes.iter().any(|n| n.code == note_codes::ASSUMED_DEFAULT));
        // 不浓缩: 水相不被移除,仅截留损失使体积略降
        assert!(out.product.volume_l() > stream.volume_l() * 0.99);
    }
}
