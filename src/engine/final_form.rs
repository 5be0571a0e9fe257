// ==========================================
// 生物工艺技术经济评估系统 - 成品形态阶段引擎
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 9. 成品形态
// 职责: 喷雾干燥 / 盘式干燥 / 液体灌装
// 红线: 干燥移除的水分作为具名 loss:* 组分入废弃流
// ==========================================

use crate::config::ProcessConfigReader;
use crate::domain::stream::{components, MaterialStream};
use crate::domain::types::{CostCategory, FinalFormRoute, RouteOverride, StageId};
use crate::domain::HandoffRecord;
use crate::engine::conditioning::safe_hours;
use crate::engine::error::EngineError;
use crate::engine::stage::{verify_component_balance, AdvisoryNote, FeedSnapshot, StageOutput};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

// ==========================================
// FinalFormEngine - 成品形态引擎
// ==========================================
pub struct FinalFormEngine;

impl FinalFormEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// 解析成品形态路线
    ///
    /// # 启发式 (Process_Model_Spec 9.1,按声明顺序)
    /// 1. target_form = "liquid" → LiquidFill
    /// 2. heat_sensitive → TrayDryer(低温慢干)
    /// 3. 默认 → SprayDryer
    ///
    /// # 护栏(显式覆写同样执行)
    /// - SprayDryer 且 heat_sensitive → 提示
    pub fn select_route<C: ProcessConfigReader>(
        &self,
        _feed: &FeedSnapshot,
        route_override: RouteOverride<FinalFormRoute>,
        cfg: &C,
    ) -> (FinalFormRoute, Vec<AdvisoryNote>) {
        let stage = StageId::FinalForm;
        let mut notes = Vec::new();
        let heat_sensitive = cfg.get_bool_or(stage, "heat_sensitive", false);

        let route = match route_override {
            RouteOverride::Explicit(route) => route,
            RouteOverride::Auto => {
                let target_form = cfg
                    .get_str(stage, "target_form")
                    .unwrap_or_else(|| "powder".to_string());
                if target_form == "liquid" {
                    FinalFormRoute::LiquidFill
                } else if heat_sensitive {
                    FinalFormRoute::TrayDryer
                } else {
                    FinalFormRoute::SprayDryer
                }
            }
        };

        if route == FinalFormRoute::SprayDryer && heat_sensitive {
            notes.push(AdvisoryNote::guardrail(
                stage,
                "热敏物料走喷雾干燥,存在活性损失风险",
            ));
        }

        (route, notes)
    }

    /// 执行成品形态
    ///
    /// # 规则
    /// - 干燥路线: 成品含水率 residual_moisture_fraction(默认 0.05,
    ///   相对成品总质量),其余水分以 loss:evaporated_water 入废弃流
    /// - 干燥收率: 喷雾 0.96 / 盘式 0.98(损失为器壁残留)
    /// - LiquidFill: 不移除水分,灌装损失 fill_loss_fraction(默认 0.01)
    ///
    /// # 配置键 (final_form.*)
    /// - residual_moisture_fraction
    /// - spray_utility_per_kg_water_usd (默认 0.12)
    ///   / tray_utility_per_kg_water_usd (默认 0.20)
    /// - spray_rate_kg_water_per_h (默认 500) / tray_rate_kg_water_per_h (默认 100)
    /// - fill_loss_fraction / fill_cost_per_l_usd (默认 0.5)
    ///   / fill_rate_l_per_h (默认 1000)
    #[instrument(skip(self, stream_in, cfg, handoff_in))]
    pub fn run<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        route: FinalFormRoute,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::FinalForm;
        match route {
            FinalFormRoute::LiquidFill => self.run_liquid_fill(stream_in, cfg, handoff_in),
            FinalFormRoute::SprayDryer | FinalFormRoute::TrayDryer => {
                self.run_dryer(stream_in, route, cfg, handoff_in)
            }
        }
    }

    fn run_dryer<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        route: FinalFormRoute,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::FinalForm;

        let (dryer_yield, utility_key, utility_default, rate_key, rate_default) = match route {
            FinalFormRoute::SprayDryer => (
                0.96,
                "spray_utility_per_kg_water_usd",
                0.12,
                "spray_rate_kg_water_per_h",
                500.0,
            ),
            _ => (
                0.98,
                "tray_utility_per_kg_water_usd",
                0.20,
                "tray_rate_kg_water_per_h",
                100.0,
            ),
        };

        let product_in = stream_in.mass_of(components::PRODUCT);
        let water_in = stream_in.mass_of(components::WATER);
        let product_out = product_in * dryer_yield;
        let solids_out: f64 = stream_in
            .components()
            .filter(|(c, _)| *c != components::WATER && *c != components::PRODUCT)
            .map(|(_, m)| m)
            .sum::<f64>()
            + product_out;

        // 成品含水率: moisture = f × (solids + moisture) → moisture = solids × f/(1−f)
        let moisture_fraction = cfg
            .get_f64_or(stage, "residual_moisture_fraction", 0.05)
            .clamp(0.0, 0.5);
        let residual_water = (solids_out * moisture_fraction / (1.0 - moisture_fraction))
            .min(water_in);
        let evaporated_water = water_in - residual_water;

        let mut product_map = BTreeMap::new();
        for (component, mass) in stream_in.components() {
            match component {
                c if c == components::PRODUCT => {
                    product_map.insert(c.to_string(), product_out);
                }
                c if c == components::WATER => {
                    product_map.insert(c.to_string(), residual_water);
                }
                c => {
                    product_map.insert(c.to_string(), mass);
                }
            }
        }
        let (product, _) = MaterialStream::from_components(product_map, 1.0, 25.0, 1.0);

        let mut waste_map = BTreeMap::new();
        waste_map.insert(
            "loss:dryer_holdup_product".to_string(),
            product_in - product_out,
        );
        waste_map.insert("loss:evaporated_water".to_string(), evaporated_water);
        let (waste, _) = MaterialStream::from_components(waste_map, 1.0, 25.0, 1.0);

        verify_component_balance(stage, stream_in, &product, &waste)?;

        let utility_cost = cfg.get_f64_or(stage, utility_key, utility_default).max(0.0)
            * evaporated_water;
        let hours = safe_hours(evaporated_water, cfg.get_f64_or(stage, rate_key, rate_default));

        let handoff = HandoffRecord {
            stage,
            pool_volume_l: product.volume_l(),
            product_concentration_g_per_l: product.concentration_g_per_l(components::PRODUCT),
            conductivity_ms_cm: None,
            ph: None,
            dna_ppm: handoff_in.dna_ppm,
            polymer_ppm: handoff_in.polymer_ppm,
            recovery_fraction: dryer_yield,
            needs_buffer_exchange: false,
            needs_polish_filtration: false,
        };

        debug!(route = %route, evaporated_water, "干燥完成");

        Ok(StageOutput {
            product,
            waste,
            handoff,
            costs: vec![(CostCategory::Utilities, utility_cost)],
            process_hours: hours,
            notes: Vec::new(),
        })
    }

    fn run_liquid_fill<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::FinalForm;
        let fill_loss = cfg
            .get_f64_or(stage, "fill_loss_fraction", 0.01)
            .clamp(0.0, 1.0);
        let retained = 1.0 - fill_loss;

        let mut product_map = BTreeMap::new();
        let mut waste_map = BTreeMap::new();
        for (component, mass) in stream_in.components() {
            product_map.insert(component.to_string(), mass * retained);
            if component == components::PRODUCT {
                waste_map.insert("loss:fill_holdup_product".to_string(), mass * fill_loss);
            } else {
                waste_map.insert(component.to_string(), mass * fill_loss);
            }
        }
        let (product, _) = MaterialStream::from_components(
            product_map,
            stream_in.density_kg_per_l,
            stream_in.temperature_c,
            stream_in.pressure_bar,
        );
        let (waste, _) = MaterialStream::from_components(waste_map, 1.0, 25.0, 1.0);

        verify_component_balance(stage, stream_in, &product, &waste)?;

        let volume_l = stream_in.volume_l();
        let fill_cost = cfg.get_f64_or(stage, "fill_cost_per_l_usd", 0.5).max(0.0) * volume_l;
        let hours = safe_hours(volume_l, cfg.get_f64_or(stage, "fill_rate_l_per_h", 1000.0));

        let handoff = HandoffRecord {
            stage,
            pool_volume_l: product.volume_l(),
            product_concentration_g_per_l: product.concentration_g_per_l(components::PRODUCT),
            conductivity_ms_cm: handoff_in.conductivity_ms_cm,
            ph: handoff_in.ph,
            dna_ppm: handoff_in.dna_ppm,
            polymer_ppm: handoff_in.polymer_ppm,
            recovery_fraction: retained,
            needs_buffer_exchange: false,
            needs_polish_filtration: false,
        };

        debug!(volume_l, fill_loss, "液体灌装完成");

        Ok(StageOutput {
            product,
            waste,
            handoff,
            costs: vec![(CostCategory::RawMaterials, fill_cost)],
            process_hours: hours,
            notes: Vec::new(),
        })
    }
}

impl Default for FinalFormEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryConfig;
    use crate::engine::stage::note_codes;

    fn feed() -> MaterialStream {
        let mut map = BTreeMap::new();
        map.insert(components::PRODUCT.to_string(), 40.0);
        map.insert(components::WATER.to_string(), 760.0);
        MaterialStream::from_components(map, 1.0, 25.0, 1.0).0
    }

    fn snapshot() -> FeedSnapshot {
        FeedSnapshot {
            volume_l: Some(800.0),
            solids_fraction_pct: None,
            conductivity_ms_cm: Some(5.0),
            product_concentration_g_per_l: Some(50.0),
            polymer_ppm: None,
            needs_buffer_exchange: false,
            needs_polish_filtration: false,
        }
    }

    #[test]
    fn test_default_route_is_spray_dryer() {
        let engine = FinalFormEngine::new();
        let cfg = InMemoryConfig::new();
        let (route, notes) = engine.select_route(&snapshot(), RouteOverride::Auto, &cfg);
        assert_eq!(route, FinalFormRoute::SprayDryer);
        assert!(notes.is_empty());
    }

    #[test]
    fn test_heat_sensitive_selects_tray_dryer() {
        let engine = FinalFormEngine::new();
        let cfg = InMemoryConfig::new().with(StageId::FinalForm, "heat_sensitive", true);
        let (route, _) = engine.select_route(&snapshot(), RouteOverride::Auto, &cfg);
        assert_eq!(route, FinalFormRoute::TrayDryer);
    }

    #[test]
    fn test_liquid_target_selects_fill() {
        let engine = FinalFormEngine::new();
        let cfg = InMemoryConfig::new().with(StageId::FinalForm, "target_form", "liquid");
        let (route, _) = engine.select_route(&snapshot(), RouteOverride::Auto, &cfg);
        assert_eq!(route, FinalFormRoute::LiquidFill);
    }

    #[test]
    fn test_explicit_spray_on_heat_sensitive_warns() {
        let engine = FinalFormEngine::new();
        let cfg = InMemoryConfig::new().with(StageId::FinalForm, "heat_sensitive", true);
        let (route, notes) = engine.select_route(
            &snapshot(),
            RouteOverride::Explicit(FinalFormRoute::SprayDryer),
            &cfg,
        );
        assert_eq!(route, FinalFormRoute::SprayDryer);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].code, note_codes::GUARDRAIL);
    }

    #[test]
    fn test_spray_dryer_books_evaporated_water_as_loss() {
        let engine = FinalFormEngine::new();
        let cfg = InMemoryConfig::new();
        let out = engine
            .run(
                &feed(),
                FinalFormRoute::SprayDryer,
                &cfg,
                &HandoffRecord::initial(StageId::Polish, 800.0),
            )
            .unwrap();
        assert!(out.waste.mass_of("loss:evaporated_water") > 700.0);
        // 成品含水率约 5%
        let total = out.product.total_mass_kg();
        let moisture = out.product.mass_of(components::WATER) / total;
        assert!((moisture - 0.05).abs() < 1e-6);
        assert!((out.product.mass_of(components::PRODUCT) - 40.0 * 0.96).abs() < 1e-9);
    }

    #[test]
    fn test_liquid_fill_keeps_water() {
        let engine = FinalFormEngine::new();
        let cfg = InMemoryConfig::new();
        let out = engine
            .run(
                &feed(),
                FinalFormRoute::LiquidFill,
                &cfg,
                &HandoffRecord::initial(StageId::Polish, 800.0),
            )
            .unwrap();
        assert!((out.product.mass_of(components::WATER) - 760.0 * 0.99).abs() < 1e-9);
        assert!(out.waste.mass_of("loss:fill_holdup_product") > 0.0);
    }

    #[test]
    fn test_tray_dryer_slower_and_costlier_per_kg() {
        let engine = FinalFormEngine::new();
        let cfg = InMemoryConfig::new();
        let h = HandoffRecord::initial(StageId::Polish, 800.0);
        let spray = engine.run(&feed(), FinalFormRoute::SprayDryer, &cfg, &h).unwrap();
        let tray = engine.run(&feed(), FinalFormRoute::TrayDryer, &cfg, &h).unwrap();
        assert!(tray.process_hours > spray.process_hours);
        let utilities = |o: &StageOutput| -> f64 {
            o.costs
                .iter()
                .filter(|(c, _)| *c == CostCategory::Utilities)
                .map(|(_, v)| *v)
                .sum()
        };
        assert!(utilities(&tray) > utilities(&spray));
    }
}
