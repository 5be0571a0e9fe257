// ==========================================
// 生物工艺技术经济评估系统 - 除菌体阶段引擎
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 4. 除菌体路线选择与执行
// 职责: 路线选择(固含量/体积/膜需求启发式) + 三条路线的回收模型
// 红线: 启发式按声明顺序评估,首条命中即定;护栏只提示不否决
// 红线: 显式覆写原样返回,不套用启发式;护栏仍然无条件执行
// ==========================================

use crate::config::{config_keys, ProcessConfigReader};
use crate::domain::stream::{components, MaterialStream};
use crate::domain::types::{CellRemovalRoute, CostCategory, RouteOverride, StageId};
use crate::domain::HandoffRecord;
use crate::engine::error::EngineError;
use crate::engine::stage::{
    note_codes, verify_component_balance, AdvisoryNote, FeedSnapshot, StageOutput,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

// ==========================================
// CellRemovalEngine - 除菌体引擎
// ==========================================
pub struct CellRemovalEngine;

impl CellRemovalEngine {
    pub fn new() -> Self {
        Self {}
    }

    // ==========================================
    // 路线选择
    // ==========================================

    /// 解析除菌体路线
    ///
    /// # 启发式 (Process_Model_Spec 4.1,按声明顺序,首条命中即定)
    /// 1. 固含量 ≥ solids_cutoff_pct (默认 3.0 %v/v) → Centrifuge
    /// 2. 进料体积 ≥ volume_cutoff_l (默认 20000 L) → Centrifuge
    /// 3. require_membrane 标志 → Membrane
    /// 4. 默认 → Membrane(最简路线)
    ///
    /// # 护栏(显式覆写同样执行)
    /// - Membrane 且固含量 > membrane_solids_guard_pct (默认 5.0) → 提示
    ///
    /// # 确定性
    /// 相同 (快照, 覆写, 配置) 必然得到相同路线与相同说明集
    pub fn select_route<C: ProcessConfigReader>(
        &self,
        feed: &FeedSnapshot,
        route_override: RouteOverride<CellRemovalRoute>,
        cfg: &C,
    ) -> (CellRemovalRoute, Vec<AdvisoryNote>) {
        let stage = StageId::CellRemoval;
        let mut notes = Vec::new();

        let route = match route_override {
            RouteOverride::Explicit(route) => route,
            RouteOverride::Auto => {
                let solids_pct = match feed.solids_fraction_pct {
                    Some(v) => v,
                    None => {
                        notes.push(AdvisoryNote::assumed_default(
                            stage,
                            "固含量缺失,启发式按 0 %v/v 处理",
                        ));
                        0.0
                    }
                };
                let solids_cutoff =
                    cfg.get_f64_or(stage, config_keys::SOLIDS_CUTOFF_PCT, 3.0);
                let volume_cutoff =
                    cfg.get_f64_or(stage, config_keys::VOLUME_CUTOFF_L, 20_000.0);
                let require_membrane =
                    cfg.get_bool_or(stage, config_keys::REQUIRE_MEMBRANE, false);

                if solids_pct >= solids_cutoff {
                    debug!(solids_pct, solids_cutoff, "固含量触发离心路线");
                    CellRemovalRoute::Centrifuge
                } else if feed.volume_l.unwrap_or(0.0) >= volume_cutoff {
                    debug!(volume_cutoff, "体积触发离心路线");
                    CellRemovalRoute::Centrifuge
                } else {
                    if require_membrane {
                        debug!("上游要求膜路线");
                    }
                    CellRemovalRoute::Membrane
                }
            }
        };

        // 护栏: 无条件执行(含显式覆写),仅提示不否决
        let guard_pct = cfg.get_f64_or(stage, config_keys::MEMBRANE_SOLIDS_GUARD_PCT, 5.0);
        if route == CellRemovalRoute::Membrane {
            if let Some(solids_pct) = feed.solids_fraction_pct {
                if solids_pct > guard_pct {
                    notes.push(AdvisoryNote::guardrail(
                        stage,
                        format!(
                            "膜路线在高固含量下不适宜: solids={:.2}%v/v > guard={:.2}%v/v",
                            solids_pct, guard_pct
                        ),
                    ));
                }
            }
        }

        (route, notes)
    }

    // ==========================================
    // 阶段执行
    // ==========================================

    /// 执行除菌体
    ///
    /// # 回收模型 (Process_Model_Spec 4.2)
    /// - Centrifuge: 产品夹带损失 = carryover_fraction(默认 0.02),随菌泥入废弃流
    /// - DepthFilter: 吸附损失 = adsorption_fraction(默认 0.03),以 loss:adsorbed_product 入账
    /// - Membrane: 产品透过率 = sieving_transmission(默认 0.99),截留部分随菌体入废弃流
    /// - 菌体去除效率: cells_removal_efficiency(默认 0.995)
    /// - 废弃流体积占比: waste_volume_fraction(按路线默认 0.08/0.05/0.10)
    ///
    /// # 失败语义
    /// - 进料体积为 0 → 记说明,按零质量继续(不伪造负质量)
    /// - 组分守恒违例 → Err(MassBalance)
    #[instrument(skip(self, stream_in, cfg, handoff_in))]
    pub fn run<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        route: CellRemovalRoute,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::CellRemoval;
        let mut notes = Vec::new();

        let feed_volume_l = stream_in.volume_l();
        if feed_volume_l <= 0.0 {
            notes.push(AdvisoryNote::assumed_default(
                stage,
                "进料体积缺失,按空流继续",
            ));
        }

        let product_in = stream_in.mass_of(components::PRODUCT);
        let cells_in = stream_in.mass_of(components::CELLS);
        let dna_in = stream_in.mass_of(components::DNA);
        let water_in = stream_in.mass_of(components::WATER);

        // 路线相关参数
        let (loss_fraction, loss_is_adsorbed, waste_frac_default) = match route {
            CellRemovalRoute::Centrifuge => (
                cfg.get_f64_or(stage, "carryover_fraction", 0.02),
                false,
                0.08,
            ),
            CellRemovalRoute::DepthFilter => (
                cfg.get_f64_or(stage, "adsorption_fraction", 0.03),
                true,
                0.05,
            ),
            CellRemovalRoute::Membrane => (
                1.0 - cfg.get_f64_or(stage, "sieving_transmission", 0.99),
                false,
                0.10,
            ),
        };
        let loss_fraction = loss_fraction.clamp(0.0, 1.0);
        let cells_eff = cfg
            .get_f64_or(stage, "cells_removal_efficiency", 0.995)
            .clamp(0.0, 1.0);
        let waste_frac = cfg
            .get_f64_or(stage, "waste_volume_fraction", waste_frac_default)
            .clamp(0.0, 1.0);

        // 质量分配
        let product_recovered = product_in * (1.0 - loss_fraction);
        let product_lost = product_in * loss_fraction;
        let cells_removed = cells_in * cells_eff;
        let cells_residual = cells_in - cells_removed;
        let water_to_waste = water_in * waste_frac;

        let mut product_map = BTreeMap::new();
        product_map.insert(components::PRODUCT.to_string(), product_recovered);
        product_map.insert(components::CELLS.to_string(), cells_residual);
        product_map.insert(components::DNA.to_string(), dna_in);
        product_map.insert(components::WATER.to_string(), water_in - water_to_waste);
        let (product, clamped) = MaterialStream::from_components(product_map, 1.0, 25.0, 1.0);
        for name in clamped {
            notes.push(AdvisoryNote::new(
                stage,
                note_codes::CLAMPED,
                format!("产品流组分 {} 为负,已钳制为 0", name),
            ));
        }

        let mut waste_map = BTreeMap::new();
        waste_map.insert(components::CELLS.to_string(), cells_removed);
        waste_map.insert(components::WATER.to_string(), water_to_waste);
        if loss_is_adsorbed {
            // 吸附到滤材上的产品,随耗材弃置,以命名损耗入账
            waste_map.insert("loss:adsorbed_product".to_string(), product_lost);
        } else {
            waste_map.insert(components::PRODUCT.to_string(), product_lost);
        }
        let (waste, _) = MaterialStream::from_components(waste_map, 1.02, 25.0, 1.0);

        // 守恒校验: 深层过滤的产品缺口由 loss:adsorbed_product 显式承载
        verify_component_balance(stage, stream_in, &product, &waste)?;

        // 成本与工时
        let (costs, hours) = self.route_costs(route, feed_volume_l, cfg);

        let recovery = if product_in > 0.0 {
            product_recovered / product_in
        } else {
            1.0
        };
        let handoff = HandoffRecord {
            stage,
            pool_volume_l: product.volume_l(),
            product_concentration_g_per_l: product.concentration_g_per_l(components::PRODUCT),
            conductivity_ms_cm: handoff_in.conductivity_ms_cm,
            ph: handoff_in.ph,
            dna_ppm: dna_ppm_of(&product),
            polymer_ppm: None,
            recovery_fraction: recovery,
            needs_buffer_exchange: false,
            needs_polish_filtration: false,
        };

        Ok(StageOutput {
            product,
            waste,
            handoff,
            costs,
            process_hours: hours,
            notes,
        })
    }

    /// 路线成本与工时
    ///
    /// # 配置键 (cell_removal.*)
    /// - centrifuge_utility_cost_per_l_usd: 默认 0.008
    /// - depth_filter_media_cost_per_l_usd: 默认 0.015
    /// - membrane_cost_per_l_usd: 默认 0.02
    /// - centrifuge_rate_l_per_h / depth_filter_rate_l_per_h / membrane_rate_l_per_h:
    ///   默认 5000 / 3000 / 2000
    fn route_costs<C: ProcessConfigReader>(
        &self,
        route: CellRemovalRoute,
        feed_volume_l: f64,
        cfg: &C,
    ) -> (Vec<(CostCategory, f64)>, f64) {
        let stage = StageId::CellRemoval;
        let volume = feed_volume_l.max(0.0);
        match route {
            CellRemovalRoute::Centrifuge => {
                let unit = cfg.get_f64_or(stage, "centrifuge_utility_cost_per_l_usd", 0.008);
                let rate = cfg.get_f64_or(stage, "centrifuge_rate_l_per_h", 5000.0);
                (
                    vec![(CostCategory::Utilities, unit.max(0.0) * volume)],
                    safe_hours(volume, rate),
                )
            }
            CellRemovalRoute::DepthFilter => {
                let unit = cfg.get_f64_or(stage, "depth_filter_media_cost_per_l_usd", 0.015);
                let rate = cfg.get_f64_or(stage, "depth_filter_rate_l_per_h", 3000.0);
                (
                    vec![(CostCategory::MembraneConsumable, unit.max(0.0) * volume)],
                    safe_hours(volume, rate),
                )
            }
            CellRemovalRoute::Membrane => {
                let unit = cfg.get_f64_or(stage, "membrane_cost_per_l_usd", 0.02);
                let rate = cfg.get_f64_or(stage, "membrane_rate_l_per_h", 2000.0);
                (
                    vec![(CostCategory::MembraneConsumable, unit.max(0.0) * volume)],
                    safe_hours(volume, rate),
                )
            }
        }
    }
}

impl Default for CellRemovalEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 体积/速率 → 工时,速率非正时回退 0
fn safe_hours(volume_l: f64, rate_l_per_h: f64) -> f64 {
    if rate_l_per_h > 0.0 {
        volume_l / rate_l_per_h
    } else {
        0.0
    }
}

/// 物料流中核酸含量 (ppm,相对总质量)
fn dna_ppm_of(stream: &MaterialStream) -> Option<f64> {
    let total = stream.total_mass_kg();
    if total > 0.0 {
        Some(stream.mass_of(components::DNA) / total * 1e6)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryConfig;

    fn snapshot(volume_l: f64, solids_pct: Option<f64>) -> FeedSnapshot {
        FeedSnapshot {
            volume_l: Some(volume_l),
            solids_fraction_pct: solids_pct,
            conductivity_ms_cm: Some(15.0),
            product_concentration_g_per_l: Some(50.0),
            polymer_ppm: None,
            needs_buffer_exchange: false,
            needs_polish_filtration: false,
        }
    }

    fn broth(product_kg: f64, cells_kg: f64, water_kg: f64) -> MaterialStream {
        let mut map = BTreeMap::new();
        map.insert(components::PRODUCT.to_string(), product_kg);
        map.insert(components::CELLS.to_string(), cells_kg);
        map.insert(components::WATER.to_string(), water_kg);
        MaterialStream::from_components(map, 1.0, 25.0, 1.0).0
    }

    // ==========================================
    // 路线选择测试
    // ==========================================

    #[test]
    fn test_high_solids_selects_centrifuge() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, _) =
            engine.select_route(&snapshot(5000.0, Some(4.0)), RouteOverride::Auto, &cfg);
        assert_eq!(route, CellRemovalRoute::Centrifuge);
    }

    #[test]
    fn test_solids_boundary_exactly_at_cutoff() {
        // 3.00 %v/v 恰好在阈值上 → 命中规则 1 (≥),选离心
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, _) =
            engine.select_route(&snapshot(5000.0, Some(3.0)), RouteOverride::Auto, &cfg);
        assert_eq!(route, CellRemovalRoute::Centrifuge);

        let (route, _) = engine.select_route(
            &snapshot(5000.0, Some(3.0 - 1e-9)),
            RouteOverride::Auto,
            &cfg,
        );
        assert_eq!(route, CellRemovalRoute::Membrane);

        let (route, _) = engine.select_route(
            &snapshot(5000.0, Some(3.0 + 1e-9)),
            RouteOverride::Auto,
            &cfg,
        );
        assert_eq!(route, CellRemovalRoute::Centrifuge);
    }

    #[test]
    fn test_large_volume_selects_centrifuge() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, _) =
            engine.select_route(&snapshot(25_000.0, Some(1.0)), RouteOverride::Auto, &cfg);
        assert_eq!(route, CellRemovalRoute::Centrifuge);
    }

    #[test]
    fn test_default_route_is_membrane() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, notes) =
            engine.select_route(&snapshot(5000.0, Some(0.0)), RouteOverride::Auto, &cfg);
        assert_eq!(route, CellRemovalRoute::Membrane);
        assert!(notes.is_empty());
    }

    #[test]
    fn test_explicit_override_returned_unchanged_without_notes() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        // 高固含量下显式指定深层过滤:不套用启发式
        let (route, notes) = engine.select_route(
            &snapshot(5000.0, Some(4.0)),
            RouteOverride::Explicit(CellRemovalRoute::DepthFilter),
            &cfg,
        );
        assert_eq!(route, CellRemovalRoute::DepthFilter);
        assert!(notes.is_empty());
    }

    #[test]
    fn test_guardrail_fires_for_membrane_at_high_solids_even_when_explicit() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, notes) = engine.select_route(
            &snapshot(5000.0, Some(8.0)),
            RouteOverride::Explicit(CellRemovalRoute::Membrane),
            &cfg,
        );
        assert_eq!(route, CellRemovalRoute::Membrane);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].code, note_codes::GUARDRAIL);
    }

    #[test]
    fn test_missing_solids_assumes_zero_with_note() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, notes) =
            engine.select_route(&snapshot(5000.0, None), RouteOverride::Auto, &cfg);
        assert_eq!(route, CellRemovalRoute::Membrane);
        assert!(notes
            .iter()
            .any(|n| n.code == note_codes::ASSUMED_DEFAULT));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let feed = snapshot(5000.0, None);
        let first = engine.select_route(&feed, RouteOverride::Auto, &cfg);
        let second = engine.select_route(&feed, RouteOverride::Auto, &cfg);
        assert_eq!(first, second);
    }

    // ==========================================
    // 执行器测试
    // ==========================================

    #[test]
    fn test_membrane_run_recovers_at_least_99_pct() {
        // 规格场景: 1000 kg 产品 + 0% 固含量 → 膜路线,产品流 ≥990 kg,废弃 ≤10 kg
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let feed = broth(1000.0, 0.0, 9000.0);
        let handoff = HandoffRecord::initial(StageId::Fermentation, feed.volume_l());
        let out = engine
            .run(&feed, CellRemovalRoute::Membrane, &cfg, &handoff)
            .unwrap();
        assert!(out.product.mass_of(components::PRODUCT) >= 990.0 - 1e-6);
        assert!(out.waste.mass_of(components::PRODUCT) <= 10.0 + 1e-6);
        let membrane_cost: f64 = out
            .costs
            .iter()
            .filter(|(c, _)| *c == CostCategory::MembraneConsumable)
            .map(|(_, v)| *v)
            .sum();
        assert!(membrane_cost > 0.0);
    }

    #[test]
    fn test_mass_conservation_across_routes() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let feed = broth(500.0, 210.0, 9490.0);
        let handoff = HandoffRecord::initial(StageId::Fermentation, feed.volume_l());
        for route in [
            CellRemovalRoute::Centrifuge,
            CellRemovalRoute::DepthFilter,
            CellRemovalRoute::Membrane,
        ] {
            let out = engine.run(&feed, route, &cfg, &handoff).unwrap();
            let total_out = out.product.total_mass_kg() + out.waste.total_mass_kg();
            assert!(
                total_out <= feed.total_mass_kg() + 1e-6,
                "route {:?} 产出超过投入",
                route
            );
        }
    }

    #[test]
    fn test_depth_filter_books_adsorption_as_named_loss() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let feed = broth(100.0, 10.0, 890.0);
        let handoff = HandoffRecord::initial(StageId::Fermentation, feed.volume_l());
        let out = engine
            .run(&feed, CellRemovalRoute::DepthFilter, &cfg, &handoff)
            .unwrap();
        assert!((out.waste.mass_of("loss:adsorbed_product") - 3.0).abs() < 1e-9);
        assert!(out.waste.total_loss_kg() > 0.0);
    }

    #[test]
    fn test_empty_feed_notes_assumption_and_yields_zero() {
        let engine = CellRemovalEngine::new();
        let cfg = InMemoryConfig::new();
        let feed = MaterialStream::empty();
        let handoff = HandoffRecord::initial(StageId::Fermentation, 0.0);
        let out = engine
            .run(&feed, CellRemovalRoute::Membrane, &cfg, &handoff)
            .unwrap();
        assert_eq!(out.product.total_mass_kg(), 0.0);
        assert!(out
            .notes
            .iter()
            .any(|n| n.code == note_codes::ASSUMED_DEFAULT));
    }
}
