// ==========================================
// 生物工艺技术经济评估系统 - 调理阶段引擎
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 7. 调理路线选择与执行
// 职责: 按上游交接标志决定缓冲液置换 / 聚合物脱除 / 直通
// 红线: 直通路线原样转递交接指标,只更新来源阶段
// ==========================================

use crate::config::{config_keys, ProcessConfigReader};
use crate::domain::stream::{components, MaterialStream};
use crate::domain::types::{ConditioningRoute, CostCategory, RouteOverride, StageId};
use crate::domain::HandoffRecord;
use crate::engine::error::EngineError;
use crate::engine::stage::{verify_component_balance, AdvisoryNote, FeedSnapshot, StageOutput};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

// ==========================================
// ConditioningEngine - 调理引擎
// ==========================================
pub struct ConditioningEngine;

impl ConditioningEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// 解析调理路线
    ///
    /// # 启发式 (Process_Model_Spec 7.1,按声明顺序)
    /// 1. needs_buffer_exchange → Diafiltration
    /// 2. needs_polish_filtration 且 prefer_continuous → ContinuousFilter
    /// 3. needs_polish_filtration → SinglePassFilter
    /// 4. 默认 → PassThrough
    ///
    /// # 护栏(显式覆写同样执行)
    /// - PassThrough 但上游标志要求处理 → 提示
    pub fn select_route<C: ProcessConfigReader>(
        &self,
        feed: &FeedSnapshot,
        route_override: RouteOverride<ConditioningRoute>,
        cfg: &C,
    ) -> (ConditioningRoute, Vec<AdvisoryNote>) {
        let stage = StageId::Conditioning;
        let mut notes = Vec::new();

        let route = match route_override {
            RouteOverride::Explicit(route) => route,
            RouteOverride::Auto => {
                if feed.needs_buffer_exchange {
                    ConditioningRoute::Diafiltration
                } else if feed.needs_polish_filtration {
                    if cfg.get_bool_or(stage, "prefer_continuous", false) {
                        ConditioningRoute::ContinuousFilter
                    } else {
                        ConditioningRoute::SinglePassFilter
                    }
                } else {
                    ConditioningRoute::PassThrough
                }
            }
        };

        // 护栏: 无条件执行
        if route == ConditioningRoute::PassThrough
            && (feed.needs_buffer_exchange || feed.needs_polish_filtration)
        {
            notes.push(AdvisoryNote::guardrail(
                stage,
                "上游交接标志要求调理处理,直通路线将原样转递",
            ));
        }

        (route, notes)
    }

    /// 执行调理
    #[instrument(skip(self, stream_in, cfg, handoff_in))]
    pub fn run<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        route: ConditioningRoute,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::Conditioning;
        match route {
            ConditioningRoute::PassThrough => Ok(pass_through(stage, stream_in, handoff_in)),
            ConditioningRoute::Diafiltration => self.run_diafiltration(stream_in, cfg, handoff_in),
            ConditioningRoute::SinglePassFilter | ConditioningRoute::ContinuousFilter => {
                self.run_polymer_removal(stream_in, route, cfg, handoff_in)
            }
        }
    }

    /// 恒容透析置换
    ///
    /// # 规则
    /// - 电导率按 exp(−DV) 衰减;体积不变(恒容)
    /// - 产品透过损失 = 1 − sieving_retention^DV 的近似:
    ///   每个透析体积损失 leakage_per_dv(默认 0.3%)
    /// - 缓冲液用量 = DV × 池体积
    ///
    /// # 配置键 (conditioning.*)
    /// - diavolumes (默认 6) / diavolume_guard_max (默认 12)
    /// - leakage_per_dv (默认 0.003)
    /// - buffer_cost_per_l_usd (默认 0.6) / membrane_cost_per_l_usd (默认 0.02)
    /// - df_flux_l_per_h (默认 800)
    /// - target_conductivity_ms_cm (默认 5)
    fn run_diafiltration<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::Conditioning;
        let mut notes = Vec::new();

        let dv = cfg
            .get_f64_or(stage, config_keys::DIAVOLUMES, 6.0)
            .max(0.0);
        let dv_guard = cfg.get_f64_or(stage, config_keys::DIAVOLUME_GUARD_MAX, 12.0);
        if dv > dv_guard {
            notes.push(AdvisoryNote::guardrail(
                stage,
                format!("透析体积数 {:.1} 超过工程上限 {:.1}", dv, dv_guard),
            ));
        }

        let pool_volume_l = stream_in.volume_l();
        let product_in = stream_in.mass_of(components::PRODUCT);
        let leakage_per_dv = cfg.get_f64_or(stage, "leakage_per_dv", 0.003).max(0.0);
        let leakage_fraction = (leakage_per_dv * dv).min(1.0);
        let product_out = product_in * (1.0 - leakage_fraction);
        let product_lost = product_in - product_out;

        // 恒容: 体积不变,水相不变;盐随透析液排走(未入组分模型,
        // 由电导率指标承载)
        let mut product_map = BTreeMap::new();
        for (component, mass) in stream_in.components() {
            if component != components::PRODUCT {
                product_map.insert(component.to_string(), mass);
            }
        }
        product_map.insert(components::PRODUCT.to_string(), product_out);
        let (product, _) = MaterialStream::from_components(
            product_map,
            stream_in.density_kg_per_l,
            stream_in.temperature_c,
            stream_in.pressure_bar,
        );

        let mut waste_map = BTreeMap::new();
        waste_map.insert("loss:df_permeate_product".to_string(), product_lost);
        waste_map.insert(components::WATER.to_string(), dv * pool_volume_l);
        let (waste, _) = MaterialStream::from_components(waste_map, 1.0, 25.0, 1.0);

        verify_component_balance(stage, stream_in, &product, &waste)?;

        let buffer_cost =
            cfg.get_f64_or(stage, "buffer_cost_per_l_usd", 0.6).max(0.0) * dv * pool_volume_l;
        let membrane_cost = cfg
            .get_f64_or(stage, "membrane_cost_per_l_usd", 0.02)
            .max(0.0)
            * pool_volume_l;
        let flux = cfg.get_f64_or(stage, "df_flux_l_per_h", 800.0);
        let hours = safe_hours(dv * pool_volume_l, flux);

        // 电导率按 exp(−DV) 衰减,渐近到置换缓冲液本底
        let buffer_cond = cfg.get_f64_or(stage, "target_conductivity_ms_cm", 5.0);
        let cond_out = handoff_in
            .conductivity_ms_cm
            .map(|c| (c * (-dv).exp()).max(buffer_cond));
        let handoff = HandoffRecord {
            stage,
            pool_volume_l: product.volume_l(),
            product_concentration_g_per_l: product.concentration_g_per_l(components::PRODUCT),
            conductivity_ms_cm: cond_out,
            ph: handoff_in.ph,
            dna_ppm: handoff_in.dna_ppm,
            polymer_ppm: handoff_in.polymer_ppm,
            recovery_fraction: 1.0 - leakage_fraction,
            needs_buffer_exchange: false,
            needs_polish_filtration: handoff_in.needs_polish_filtration,
        };

        debug!(dv, pool_volume_l, "透析置换完成");

        Ok(StageOutput {
            product,
            waste,
            handoff,
            costs: vec![
                (CostCategory::BufferReagent, buffer_cost),
                (CostCategory::MembraneConsumable, membrane_cost),
            ],
            process_hours: hours,
            notes,
        })
    }

    /// 聚合物脱除过滤(单程 / 连续)
    ///
    /// # 规则
    /// - 聚合物截留率 polymer_removal(默认 0.95),截留量入废弃流
    /// - 产品透过率: 单程 0.98 / 连续 0.99
    /// - 连续路线耗材单价更高、耗时更短
    ///
    /// # 配置键 (conditioning.*)
    /// - polymer_removal
    /// - single_pass_cost_per_l_usd (默认 0.012) / continuous_cost_per_l_usd (默认 0.018)
    /// - single_pass_rate_l_per_h (默认 1500) / continuous_rate_l_per_h (默认 3000)
    fn run_polymer_removal<C: ProcessConfigReader>(
        &self,
        stream_in: &MaterialStream,
        route: ConditioningRoute,
        cfg: &C,
        handoff_in: &HandoffRecord,
    ) -> Result<StageOutput, EngineError> {
        let stage = StageId::Conditioning;
        let volume_l = stream_in.volume_l();

        let polymer_removal = cfg
            .get_f64_or(stage, "polymer_removal", 0.95)
            .clamp(0.0, 1.0);
        let transmission = match route {
            ConditioningRoute::SinglePassFilter => 0.98,
            _ => 0.99,
        };

        let product_in = stream_in.mass_of(components::PRODUCT);
        let polymer_in = stream_in.mass_of(components::POLYMER);
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
        waste_map.insert(components::POLYMER.to_string(), polymer_in - polymer_out);
        let (waste, _) = MaterialStream::from_components(waste_map, 1.0, 25.0, 1.0);

        verify_component_balance(stage, stream_in, &product, &waste)?;

        let (cost_key, cost_default, rate_key, rate_default) = match route {
            ConditioningRoute::SinglePassFilter => (
                "single_pass_cost_per_l_usd",
                0.012,
                "single_pass_rate_l_per_h",
                1500.0,
            ),
            _ => (
                "continuous_cost_per_l_usd",
                0.018,
                "continuous_rate_l_per_h",
                3000.0,
            ),
        };
        let cost = cfg.get_f64_or(stage, cost_key, cost_default).max(0.0) * volume_l;
        let hours = safe_hours(volume_l, cfg.get_f64_or(stage, rate_key, rate_default));

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

        debug!(route = %route, polymer_removal, "聚合物脱除完成");

        Ok(StageOutput {
            product,
            waste,
            handoff,
            costs: vec![(CostCategory::MembraneConsumable, cost)],
            process_hours: hours,
            notes: Vec::new(),
        })
    }
}

impl Default for ConditioningEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 直通: 物料流与交接指标原样转递,只更新来源阶段
pub(crate) fn pass_through(
    stage: StageId,
    stream_in: &MaterialStream,
    handoff_in: &HandoffRecord,
) -> StageOutput {
    StageOutput {
        product: stream_in.clone(),
        waste: MaterialStream::empty(),
        handoff: handoff_in.forwarded_by(stage),
        costs: Vec::new(),
        process_hours: 0.0,
        notes: Vec::new(),
    }
}

pub(crate) fn safe_hours(volume_l: f64, rate_l_per_h: f64) -> f64 {
    if rate_l_per_h > 0.0 {
        volume_l / rate_l_per_h
    } else {
        0.0
    }
}
