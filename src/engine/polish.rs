// ==========================================
// 生物工艺技术经济评估系统 - 精制阶段引擎
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 8. 精制路线选择与执行
// 职责: 细微粒精制 / 除菌过滤 / 直通
// ==========================================

use crate::config::ProcessConfigReader;
use crate::domain::stream::{components, MaterialStream};
use crate::domain::types::{CostCategory, PolishRoute, RouteOverride, StageId};
use crate::domain::HandoffRecord;
use crate::engine::conditioning::{pass_through, safe_hours};
use crate::engine::error::EngineError;
use crate::engine::stage::{verify_component_balance, AdvisoryNote, FeedSnapshot, StageOutput};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

// ==========================================
// PolishEngine - 精制引擎
// ==========================================
pub struct PolishEngine;

impl PolishEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// 解析精制路线
    ///
    /// # 启发式 (Process_Model_Spec 8.1,按声明顺序)
    /// 1. needs_polish_filtration(调理未清除)→ FinePolishFilter
    /// 2. require_sterile(默认 true)→ SterileFilter
    /// 3. 默认 → PassThrough
    ///
    /// # 护栏(显式覆写同样执行)
    /// - PassThrough 但残留聚合物标志仍在 → 提示
    pub fn select_route<C: ProcessConfigReader>(
        &self,
        feed: &FeedSnapshot,
        route_override: RouteOverride<PolishRoute>,
        cfg: &C,
    ) -> (PolishRoute, Vec<AdvisoryNote>) {
        let stage = StageId::Polish;
        let mut notes = Vec::new();

        let route = match route_override {
            RouteOverride::Explicit(route) => route,
            RouteOverride::Auto => {
                if feed.needs_polish_filtration {
                    PolishRoute::FinePolishFilter
                } else if cfg.get_bool_or(stage, "require_sterile", true) {
                    PolishRoute::SterileFilter
                } else {
                    PolishRoute::PassThrough
                }
            }
        };

        if route == PolishRoute::PassThrough && feed.needs_polish_filtration {
            notes.push(AdvisoryNote::guardrail(
                stage,
                "残留聚合物标志仍在,直通路线不做清除",
            ));
        }

        (route, notes)
    }

    /// 执行精制
    ///
    /// # 规则
    /// - FinePolishFilter: 聚合物截留 fine_polymer_removal(默认 0.98),
    ///   产品透过 0.97
    /// - SterileFilter: 产品透过 0.99,无聚合物清除
    /// - PassThrough: 原样转递
    ///
    /// # 配置键 (polish.*)
    /// - fine_polymer_removal
    /// - fine_cost_per_l_usd (默认 0.03) / sterile_cost_per_l_usd (默认 0.04)
    /// - fine_rate_l_per_h (默认 1000) / sterile_rate_l_per_h (默认 2000)
    #[instrument(skip(self, stream_in, cfg, handoff_in))]
    pub fn run<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        route: PolishRoute,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::Polish;
        if route == PolishRoute::PassThrough {
            return Ok(pass_through(stage, stream_in, handoff_in));
        }

        let volume_l = stream_in.volume_l();
        let product_in = stream_in.mass_of(components::PRODUCT);
        let polymer_in = stream_in.mass_of(components::POLYMER);

        let (transmission, polymer_removal, cost_per_l, rate) = match route {
            PolishRoute::FinePolishFilter => (
                0.97,
                cfg.get_f64_or(stage, "fine_polymer_removal", 0.98)
                    .clamp(0.0, 1.0),
                cfg.get_f64_or(stage, "fine_cost_per_l_usd", 0.03).max(0.0),
                cfg.get_f64_or(stage, "fine_rate_l_per_h", 1000.0),
            ),
            _ => (
                0.99,
                0.0,
                cfg.get_f64_or(stage, "sterile_cost_per_l_usd", 0.04)
                    .max(0.0),
                cfg.get_f64_or(stage, "sterile_rate_l_per_h", 2000.0),
            ),
        };

        let product_out = product_in * transmission;
        let polymer_out = polymer_in * (1.0 - polymer_removal);

        let mut product_map = BTreeMap::new();
        for (component, mass) in stream_in.components() {
            match component {
                c if c == components::PRODUCT => {
                    product_map.insert(c.to_string(), product_out);
                }
                c if c == components::POLYMER => {
                    product_map.insert(c.to_string(), polymer_out);
                }
                c => {
                    product_map.insert(c.to_string(), mass);
                }
            }
        }
        let (product, _) = MaterialStream::from_components(
            product_map,
            stream_in.density_kg_per_l,
            stream_in.temperature_c,
            stream_in.pressure_bar,
        );

        let mut waste_map = BTreeMap::new();
        waste_map.insert(
            "loss:filter_retained_product".to_string(),
            product_in - product_out,
        );
        if polymer_in - polymer_out > 0.0 {
            waste_map.insert(components::POLYMER.to_string(), polymer_in - polymer_out);
        }
        let (waste, _) = MaterialStream::from_components(waste_map, 1.0, 25.0, 1.0);

        verify_component_balance(stage, stream_in, &product, &waste)?;

        let polymer_ppm = {
            let total = product.total_mass_kg();
            if total > 0.0 {
                Some(product.mass_of(components::POLYMER) / total * 1e6)
            } else {
                None
            }
        };
        let handoff = HandoffRecord {
            stage,
            pool_volume_l: product.volume_l(),
            product_concentration_g_per_l: product.concentration_g_per_l(components::PRODUCT),
            conductivity_ms_cm: handoff_in.conductivity_ms_cm,
            ph: handoff_in.ph,
            dna_ppm: handoff_in.dna_ppm,
            polymer_ppm,
            recovery_fraction: transmission,
            needs_buffer_exchange: handoff_in.needs_buffer_exchange,
            needs_polish_filtration: false,
        };

        debug!(route = %route, volume_l, "精制完成");

        Ok(StageOutput {
            product,
            waste,
            handoff,
            costs: vec![(CostCategory::MembraneConsumable, cost_per_l * volume_l)],
            process_hours: safe_hours(volume_l, rate),
            notes: Vec::new(),
        })
    }
}

impl Default for PolishEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryConfig;
    use crate::engine::stage::note_codes;

    fn feed(polymer_kg: f64) -> MaterialStream {
        let mut map = BTreeMap::new();
        map.insert(components::PRODUCT.to_string(), 40.0);
        map.insert(components::POLYMER.to_string(), polymer_kg);
        map.insert(components::WATER.to_string(), 760.0);
        MaterialStream::from_components(map, 1.0, 25.0, 1.0).0
    }

    fn snapshot(polish: bool) -> FeedSnapshot {
        FeedSnapshot {
            volume_l: Some(800.0),
            solids_fraction_pct: None,
            conductivity_ms_cm: Some(5.0),
            product_concentration_g_per_l: Some(50.0),
            polymer_ppm: if polish { Some(60.0) } else { None },
            needs_buffer_exchange: false,
            needs_polish_filtration: polish,
        }
    }

    fn handoff(polish: bool) -> HandoffRecord {
        let mut h = HandoffRecord::initial(StageId::Conditioning, 800.0);
        h.needs_polish_filtration = polish;
        h
    }

    #[test]
    fn test_polymer_flag_selects_fine_filter() {
        let engine = PolishEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, _) = engine.select_route(&snapshot(true), RouteOverride::Auto, &cfg);
        assert_eq!(route, PolishRoute::FinePolishFilter);
    }

    #[test]
    fn test_default_is_sterile_filter() {
        let engine = PolishEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, _) = engine.select_route(&snapshot(false), RouteOverride::Auto, &cfg);
        assert_eq!(route, PolishRoute::SterileFilter);
    }

    #[test]
    fn test_sterile_not_required_selects_pass_through() {
        let engine = PolishEngine::new();
        let cfg = InMemoryConfig::new().with(StageId::Polish, "require_sterile", false);
        let (route, _) = engine.select_route(&snapshot(false), RouteOverride::Auto, &cfg);
        assert_eq!(route, PolishRoute::PassThrough);
    }

    #[test]
    fn test_explicit_pass_through_with_polymer_flag_warns() {
        let engine = PolishEngine::new();
        let cfg = InMemoryConfig::new();
        let (_, notes) = engine.select_route(
            &snapshot(true),
            RouteOverride::Explicit(PolishRoute::PassThrough),
            &cfg,
        );
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].code, note_codes::GUARDRAIL);
    }

    #[test]
    fn test_fine_filter_clears_polymer() {
        let engine = PolishEngine::new();
        let cfg = InMemoryConfig::new();
        let out = engine
            .run(&feed(0.05), PolishRoute::FinePolishFilter, &cfg, &handoff(true))
            .unwrap();
        assert!(out.product.mass_of(components::POLYMER) < 0.05 * 0.03);
        assert!(!out.handoff.needs_polish_filtration);
        assert!(out.process_hours > 0.0);
    }

    #[test]
    fn test_sterile_filter_costs_booked() {
        let engine = PolishEngine::new();
        let cfg = InMemoryConfig::new();
        let out = engine
            .run(&feed(0.0), PolishRoute::SterileFilter, &cfg, &handoff(false))
            .unwrap();
        let membrane: f64 = out
            .costs
            .iter()
            .filter(|(c, _)| *c == CostCategory::MembraneConsumable)
            .map(|(_, v)| *v)
            .sum();
        assert!((membrane - 0.04 * 800.0).abs() < 1e-6);
        assert!((out.product.mass_of(components::PRODUCT) - 40.0 * 0.99).abs() < 1e-9);
    }
}
