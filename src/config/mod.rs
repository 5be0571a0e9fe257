// ==========================================
// 生物工艺技术经济评估系统 - 配置层
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 11. 配置项全集
// ==========================================
// 职责: 工艺参数配置读取接口与内存实现
// 红线: 核心引擎对配置只读;缺失可选键回退文档化默认值
// ==========================================

pub mod in_memory;
pub mod provider;

// 重导出核心配置接口
pub use in_memory::InMemoryConfig;
pub use provider::{config_keys, ConfigValue, ProcessConfigReader};
