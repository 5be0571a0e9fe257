// ==========================================
// 生物工艺技术经济评估系统 - 引擎层
// ==========================================
// 依据: TEA_Master_Spec.md - PART B 决策与计算引擎
// ==========================================
// 职责: 阶段路线选择与执行、CMO 合同计费、合并分摊、管线编排
// 红线: 引擎无状态;路线选择是 (快照, 覆写, 配置) 的纯函数
// ==========================================

pub mod allocation;
pub mod capture;
pub mod cell_removal;
pub mod cmo;
pub mod concentration;
pub mod conditioning;
pub mod error;
pub mod final_form;
pub mod orchestrator;
pub mod polish;
pub mod stage;
pub mod upstream;

// 重导出核心引擎
pub use allocation::{AllocationEngine, AllocationInput, AllocationResult};
pub use capture::CaptureEngine;
pub use cell_removal::CellRemovalEngine;
pub use cmo::{
    CampaignStructure, CmoContractBreakdown, CmoContractEngine, CmoDiscountCurve, CmoRateCard,
    CmoTimings,
};
pub use concentration::ConcentrationEngine;
pub use conditioning::ConditioningEngine;
pub use error::EngineError;
pub use final_form::FinalFormEngine;
pub use orchestrator::{run_scenarios, PipelineOrchestrator, PipelineResult, Scenario, StageReport};
pub use polish::PolishEngine;
pub use stage::{note_codes, AdvisoryNote, FeedSnapshot, StageOutput};
pub use upstream::{FermentationEngine, SeedGrowthEngine};
