// ==========================================
// 生物工艺技术经济评估系统 - 物料流快照
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 1. 物料流数据模型
// 红线: 构造后不可变,阶段转换必须新建快照(copy-on-transform)
// 红线: 组分质量不得为负,负值一律钳制为 0 并由调用方记录说明
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 损耗组分名前缀
///
/// 质量守恒要求阶段输出(产品+废弃)不超过输入,任何差额
/// 必须以 `loss:` 前缀的命名组分显式入账,不允许静默丢弃。
pub const LOSS_PREFIX: &str = "loss:";

/// 约定组分名
///
/// 物料流组分表是开放的字符串键,但管线各阶段对这几个
/// 约定组分做质量平衡与浓度推导。
pub mod components {
    /// 目标产品
    pub const PRODUCT: &str = "product";
    /// 菌体/细胞固形物
    pub const CELLS: &str = "cells";
    /// 水相(载体)
    pub const WATER: &str = "water";
    /// 捕获聚合物(凝聚路线外加试剂)
    pub const POLYMER: &str = "polymer";
    /// 宿主核酸杂质
    pub const DNA: &str = "dna";
}

// ==========================================
// MaterialStream - 物料流快照
// ==========================================

/// 物料流:组分质量 + 温度/压力 的不可变快照
///
/// # 单位约定
/// - 组分质量: kg
/// - 密度: kg/L
/// - 体积: L (总质量/密度)
/// - 浓度: g/L (质量×1000/体积)
///
/// 组分表使用 BTreeMap 保证遍历顺序确定,结果可复现。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialStream {
    components: BTreeMap<String, f64>,
    pub density_kg_per_l: f64,
    pub temperature_c: f64,
    pub pressure_bar: f64,
}

impl MaterialStream {
    /// 从组分表构造物料流
    ///
    /// # 规则
    /// - 负质量组分钳制为 0,组分名记入返回的钳制清单(由调用方生成说明)
    /// - 密度 ≤ 0 时回退为水密度 1.0 kg/L,同样记入清单
    ///
    /// # 返回
    /// (物料流, 被钳制/回退的字段名清单)
    pub fn from_components(
        components: BTreeMap<String, f64>,
        density_kg_per_l: f64,
        temperature_c: f64,
        pressure_bar: f64,
    ) -> (Self, Vec<String>) {
        let mut clamped = Vec::new();
        let mut clean = BTreeMap::new();
        for (name, mass) in components {
            if mass < 0.0 {
                clamped.push(name.clone());
                clean.insert(name, 0.0);
            } else {
                clean.insert(name, mass);
            }
        }

        let density = if density_kg_per_l > 0.0 {
            density_kg_per_l
        } else {
            clamped.push("density_kg_per_l".to_string());
            1.0
        };

        (
            Self {
                components: clean,
                density_kg_per_l: density,
                temperature_c,
                pressure_bar,
            },
            clamped,
        )
    }

    /// 构造空物料流(常温常压,水密度)
    pub fn empty() -> Self {
        Self {
            components: BTreeMap::new(),
            density_kg_per_l: 1.0,
            temperature_c: 25.0,
            pressure_bar: 1.0,
        }
    }

    /// 单组分便捷构造(测试与演示场景常用)
    pub fn single(component: &str, mass_kg: f64, density_kg_per_l: f64) -> Self {
        let mut components = BTreeMap::new();
        components.insert(component.to_string(), mass_kg.max(0.0));
        Self {
            components,
            density_kg_per_l: if density_kg_per_l > 0.0 {
                density_kg_per_l
            } else {
                1.0
            },
            temperature_c: 25.0,
            pressure_bar: 1.0,
        }
    }

    // ==========================================
    // 派生属性
    // ==========================================

    /// 总质量 (kg)
    pub fn total_mass_kg(&self) -> f64 {
        self.components.values().sum()
    }

    /// 体积 (L) = 总质量 / 密度
    pub fn volume_l(&self) -> f64 {
        self.total_mass_kg() / self.density_kg_per_l
    }

    /// 指定组分质量 (kg),不存在返回 0
    pub fn mass_of(&self, component: &str) -> f64 {
        self.components.get(component).copied().unwrap_or(0.0)
    }

    /// 指定组分浓度 (g/L)
    ///
    /// # 返回
    /// - Some(g/L): 体积 > 0
    /// - None: 空流(体积为 0 时浓度无定义,不伪造 0)
    pub fn concentration_g_per_l(&self, component: &str) -> Option<f64> {
        let volume = self.volume_l();
        if volume > 0.0 {
            Some(self.mass_of(component) * 1000.0 / volume)
        } else {
            None
        }
    }

    /// 组分遍历(按组分名字典序,确定性)
    pub fn components(&self) -> impl Iterator<Item = (&str, f64)> {
        self.components.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// 组分数量
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// 损耗组分合计 (kg)
    pub fn total_loss_kg(&self) -> f64 {
        self.components
            .iter()
            .filter(|(name, _)| name.starts_with(LOSS_PREFIX))
            .map(|(_, mass)| *mass)
            .sum()
    }
}
