// ==========================================
// 生物工艺技术经济评估系统 - 工艺配置读取 Trait
// ==========================================
// 依据: TEA_Master_Spec.md - PART E 外部协作者边界
// 依据: Process_Model_Spec_v0.4.md - 11. 配置项全集
// 职责: 定义核心引擎所需的配置读取接口(不包含实现)
// 红线: 核心只读配置,不包含配置写入、不包含业务逻辑
// 红线: 可选键缺失必须回退到文档化默认值,不得报错
// ==========================================

use crate::domain::types::StageId;
use serde::{Deserialize, Serialize};

// ==========================================
// 配置键常量
// ==========================================
// 多处引用的键集中定义,避免散落的字符串字面量
pub mod config_keys {
    /// 路线覆写(字符串,"auto" 或具体路线码)
    pub const ROUTE_OVERRIDE: &str = "route_override";

    // ===== 除菌体 =====
    pub const SOLIDS_FRACTION_PCT: &str = "solids_fraction_pct";
    pub const SOLIDS_CUTOFF_PCT: &str = "solids_cutoff_pct";
    pub const VOLUME_CUTOFF_L: &str = "volume_cutoff_l";
    pub const REQUIRE_MEMBRANE: &str = "require_membrane";
    pub const MEMBRANE_SOLIDS_GUARD_PCT: &str = "membrane_solids_guard_pct";

    // ===== 浓缩 =====
    pub const TARGET_VRR: &str = "target_vrr";
    pub const VRR_GUARD_MAX: &str = "vrr_guard_max";
    pub const DIAVOLUMES: &str = "diavolumes";
    pub const DIAVOLUME_GUARD_MAX: &str = "diavolume_guard_max";

    // ===== 捕获 =====
    pub const RESIN_DBC_G_PER_L: &str = "resin_dbc_g_per_l";
    pub const RESIN_COST_PER_L: &str = "resin_cost_per_l";
    pub const RESIN_CYCLE_LIFE: &str = "resin_cycle_life";
    pub const POLYMER_RESIDUE_LIMIT_PPM: &str = "polymer_residue_limit_ppm";

    // ===== 分摊 =====
    pub const ALLOCATION_BASIS: &str = "allocation_basis";
}

// ==========================================
// ConfigValue - 配置值
// ==========================================

/// 配置值:数值/文本/布尔三种形态
///
/// 文本形态允许携带可解析的数值(配置表以字符串落盘的场景),
/// 读取端按需转换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl ConfigValue {
    /// 转数值:Number 直取,Text 尝试解析,Flag 不转换
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Number(v) => Some(*v),
            ConfigValue::Text(s) => s.trim().parse::<f64>().ok(),
            ConfigValue::Flag(_) => None,
        }
    }

    /// 转布尔:Flag 直取,Text 识别 true/false/1/0
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Flag(v) => Some(*v),
            ConfigValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            ConfigValue::Number(_) => None,
        }
    }

    /// 转文本
    pub fn as_text(&self) -> Option<String> {
        match self {
            ConfigValue::Text(s) => Some(s.clone()),
            ConfigValue::Number(v) => Some(v.to_string()),
            ConfigValue::Flag(v) => Some(v.to_string()),
        }
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Number(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Flag(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Text(v.to_string())
    }
}

// ==========================================
// ProcessConfigReader Trait
// ==========================================
// 用途: 核心引擎所需的配置读取接口
// 实现者: InMemoryConfig(演示/测试), 外部配置提供方(生产)
pub trait ProcessConfigReader: Send + Sync {
    /// 读取指定阶段的原始配置值
    ///
    /// # 参数
    /// - stage: 工艺阶段
    /// - key: 配置键(不含阶段前缀)
    ///
    /// # 返回
    /// - Some(ConfigValue): 配置存在
    /// - None: 配置不存在(调用方按默认值兜底)
    fn get_raw(&self, stage: StageId, key: &str) -> Option<ConfigValue>;

    /// 读取数值配置
    fn get_f64(&self, stage: StageId, key: &str) -> Option<f64> {
        self.get_raw(stage, key).and_then(|v| v.as_f64())
    }

    /// 读取数值配置,缺失时回退默认值
    fn get_f64_or(&self, stage: StageId, key: &str, default: f64) -> f64 {
        self.get_f64(stage, key).unwrap_or(default)
    }

    /// 读取布尔配置
    fn get_bool(&self, stage: StageId, key: &str) -> Option<bool> {
        self.get_raw(stage, key).and_then(|v| v.as_bool())
    }

    /// 读取布尔配置,缺失时回退默认值
    fn get_bool_or(&self, stage: StageId, key: &str, default: bool) -> bool {
        self.get_bool(stage, key).unwrap_or(default)
    }

    /// 读取文本配置
    fn get_str(&self, stage: StageId, key: &str) -> Option<String> {
        self.get_raw(stage, key).and_then(|v| v.as_text())
    }

    /// 读取路线覆写字符串(None = 未配置 = 自动)
    fn route_override(&self, stage: StageId) -> Option<String> {
        self.get_str(stage, config_keys::ROUTE_OVERRIDE)
    }
}
