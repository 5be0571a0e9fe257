// ==========================================
// 生物工艺技术经济评估系统 - 核心库
// ==========================================
// 依据: TEA_Master_Spec.md - 系统宪法
// 技术栈: Rust (单线程确定性管线)
// 系统定位: 技术经济评估决策支持 (护栏只提示,人工最终控制权)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 配置层 - 工艺参数读取
pub mod config;

// 引擎层 - 路线选择/阶段执行/计费/分摊/编排
pub mod engine;

// 报表导出
pub mod report;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{
    AllocationBasis, CaptureRoute, CellRemovalRoute, ConcentrationRoute, ConditioningRoute,
    CostCategory, CostEntry, CostLedger, FinalFormRoute, HandoffRecord, LedgerError,
    MaterialStream, PolishRoute, RouteOverride, StageId,
};

// 配置
pub use config::{config_keys, ConfigValue, InMemoryConfig, ProcessConfigReader};

// 引擎
pub use engine::{
    AdvisoryNote, AllocationEngine, AllocationResult, CampaignStructure, CaptureEngine,
    CellRemovalEngine, CmoContractBreakdown, CmoContractEngine, CmoDiscountCurve, CmoRateCard,
    ConcentrationEngine, ConditioningEngine, EngineError, FinalFormEngine, PipelineOrchestrator,
    PipelineResult, PolishEngine, Scenario, SeedGrowthEngine,
};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "生物工艺技术经济评估系统";

// ==========================================
// 预编译检查
// ==========================================
