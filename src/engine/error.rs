// ==========================================
// 生物工艺技术经济评估系统 - 引擎层错误类型
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 7. 错误分级
// 工具: thiserror 派生宏
// ==========================================
// 红线: 配置错误与质量守恒违例立即上抛,不返回部分结果
// 红线: 分母为零的分摊不是错误,以"无定义"结果表达(见 allocation)
// ==========================================

use crate::domain::ledger::LedgerError;
use crate::domain::types::StageId;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    // ===== 配置错误(致命) =====
    #[error("配置错误: stage={stage}, {message}")]
    Configuration { stage: StageId, message: String },

    // ===== 质量守恒违例(致命,属建模缺陷,禁止静默修正) =====
    #[error(
        "质量守恒违例: stage={stage}, component={component}, 输入={input_kg}kg, 输出={output_kg}kg"
    )]
    MassBalance {
        stage: StageId,
        component: String,
        input_kg: f64,
        output_kg: f64,
    },

    // ===== 台账错误(负数/非法金额入账) =====
    #[error("成本台账错误: {0}")]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    /// 配置错误便捷构造
    pub fn configuration(stage: StageId, message: impl Into<String>) -> Self {
        EngineError::Configuration {
            stage,
            message: message.into(),
        }
    }

    /// 错误归属的阶段(台账错误无单一阶段归属时返回 None)
    pub fn stage(&self) -> Option<StageId> {
        match self {
            EngineError::Configuration { stage, .. } => Some(*stage),
            EngineError::MassBalance { stage, .. } => Some(*stage),
            EngineError::Ledger(LedgerError::NegativeAmount { stage, .. }) => Some(*stage),
            EngineError::Ledger(LedgerError::NonFiniteAmount { stage, .. }) => Some(*stage),
        }
    }
}
