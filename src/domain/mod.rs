// ==========================================
// 生物工艺技术经济评估系统 - 领域模型层
// ==========================================
// 依据: TEA_Master_Spec.md - PART C 数据与状态体系
// 依据: Process_Model_Spec_v0.4.md - 主实体定义
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含引擎逻辑,不含 I/O
// ==========================================

pub mod handoff;
pub mod ledger;
pub mod stream;
pub mod types;

// 重导出核心类型
pub use handoff::HandoffRecord;
pub use ledger::{CostEntry, CostLedger, LedgerError};
pub use stream::{MaterialStream, LOSS_PREFIX};
pub use types::{
    AllocationBasis, CaptureRoute, CellRemovalRoute, ConcentrationRoute, ConditioningRoute,
    CostCategory, FinalFormRoute, PolishRoute, RouteOverride, StageId,
};
