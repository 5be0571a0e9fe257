// ==========================================
// 生物工艺技术经济评估系统 - 内存配置提供方
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 11. 配置项全集
// 职责: 以内存键值表实现 ProcessConfigReader,支持 JSON 装载
// 用途: 演示场景、测试、敏感性扫描的参数覆写
// ==========================================

use crate::config::provider::{ConfigValue, ProcessConfigReader};
use crate::domain::types::StageId;
use serde_json::Value;
use std::collections::BTreeMap;

// ==========================================
// InMemoryConfig - 内存配置
// ==========================================

/// 内存键值配置表
///
/// 键格式: "阶段码.配置键",如 "capture.resin_dbc_g_per_l"。
/// BTreeMap 保证遍历与导出顺序确定。
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl InMemoryConfig {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// 写入一项配置(构造期使用;引擎侧只读)
    pub fn set(&mut self, stage: StageId, key: &str, value: impl Into<ConfigValue>) -> &mut Self {
        self.values
            .insert(format!("{}.{}", stage.code(), key), value.into());
        self
    }

    /// 链式写入便捷方法
    pub fn with(mut self, stage: StageId, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.set(stage, key, value);
        self
    }

    /// 从 JSON 对象装载配置
    ///
    /// # 支持两种形态
    /// 1. 嵌套: {"capture": {"resin_dbc_g_per_l": 40.0}}
    /// 2. 扁平: {"capture.resin_dbc_g_per_l": 40.0}
    ///
    /// # 规则
    /// - 数值/布尔/字符串之外的值(数组、嵌套对象第二层)一律跳过并返回其键名
    /// - 未知阶段前缀的键跳过并返回其键名
    ///
    /// # 返回
    /// (配置, 被跳过的键清单)
    pub fn from_json(root: &Value) -> (Self, Vec<String>) {
        let mut config = Self::new();
        let mut skipped = Vec::new();

        let Some(object) = root.as_object() else {
            skipped.push("$".to_string());
            return (config, skipped);
        };

        for (key, value) in object {
            match value {
                Value::Object(stage_map) => {
                    // 嵌套形态: 外层键是阶段码
                    match stage_from_code(key) {
                        Some(stage) => {
                            for (inner_key, inner_value) in stage_map {
                                match json_to_config_value(inner_value) {
                                    Some(v) => {
                                        config.set(stage, inner_key, v);
                                    }
                                    None => skipped.push(format!("{}.{}", key, inner_key)),
                                }
                            }
                        }
                        None => skipped.push(key.clone()),
                    }
                }
                _ => {
                    // 扁平形态: "stage.key"
                    let Some((stage_code, inner_key)) = key.split_once('.') else {
                        skipped.push(key.clone());
                        continue;
                    };
                    match (stage_from_code(stage_code), json_to_config_value(value)) {
                        (Some(stage), Some(v)) => {
                            config.set(stage, inner_key, v);
                        }
                        _ => skipped.push(key.clone()),
                    }
                }
            }
        }

        (config, skipped)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ProcessConfigReader for InMemoryConfig {
    fn get_raw(&self, stage: StageId, key: &str) -> Option<ConfigValue> {
        self.values
            .get(&format!("{}.{}", stage.code(), key))
            .cloned()
    }
}

/// 阶段码 → StageId
fn stage_from_code(code: &str) -> Option<StageId> {
    StageId::ALL.iter().copied().find(|s| s.code() == code)
}

/// JSON 标量 → ConfigValue
fn json_to_config_value(value: &Value) -> Option<ConfigValue> {
    match value {
        Value::Number(n) => n.as_f64().map(ConfigValue::Number),
        Value::Bool(b) => Some(ConfigValue::Flag(*b)),
        Value::String(s) => Some(ConfigValue::Text(s.clone())),
        _ => None,
    }
}
