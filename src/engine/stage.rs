// ==========================================
// 生物工艺技术经济评估系统 - 阶段执行契约
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 3. 阶段执行器契约
// 职责: 定义各阶段执行器共享的输入快照、输出结构、说明条目
// 红线: 所有规则必须输出 reason;守恒校验缺口必须显式入账
// ==========================================

use crate::domain::stream::MaterialStream;
use crate::domain::types::{CostCategory, StageId};
use crate::domain::HandoffRecord;
use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};

// ==========================================
// 说明条目代码
// ==========================================
pub mod note_codes {
    /// 护栏提示:解析出的路线对该进料特征不适宜(仅提示,不否决)
    pub const GUARDRAIL: &str = "GUARDRAIL";
    /// 默认值兜底:上游指标缺失,按本地合理默认值继续
    pub const ASSUMED_DEFAULT: &str = "ASSUMED_DEFAULT";
    /// 钳制:负值输入被钳制为 0
    pub const CLAMPED: &str = "CLAMPED";
    /// 分摊无定义:分母为零
    pub const UNDEFINED_ALLOCATION: &str = "UNDEFINED_ALLOCATION";
    /// 配置项被跳过(装载期)
    pub const CONFIG_SKIPPED: &str = "CONFIG_SKIPPED";
}

// ==========================================
// AdvisoryNote - 说明条目
// ==========================================

/// 说明条目:护栏提示与默认值兜底的记录
///
/// 说明条目只记录、不中断;随成功结果一并返回供人工复核。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryNote {
    pub stage: StageId,
    pub code: String,
    pub message: String,
}

impl AdvisoryNote {
    pub fn new(stage: StageId, code: &str, message: impl Into<String>) -> Self {
        Self {
            stage,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn guardrail(stage: StageId, message: impl Into<String>) -> Self {
        Self::new(stage, note_codes::GUARDRAIL, message)
    }

    pub fn assumed_default(stage: StageId, message: impl Into<String>) -> Self {
        Self::new(stage, note_codes::ASSUMED_DEFAULT, message)
    }
}

// ==========================================
// FeedSnapshot - 进料特征快照
// ==========================================

/// 路线选择器的进料特征输入
///
/// 选择器是 (快照, 覆写, 配置) 的纯函数;相同输入必须解析出
/// 相同路线与相同说明集(确定性要求,见 Process_Model_Spec 2.2)。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// 进料体积 (L);缺失时执行器按默认值兜底
    pub volume_l: Option<f64>,
    /// 固含量 (%v/v)
    pub solids_fraction_pct: Option<f64>,
    /// 电导率 (mS/cm)
    pub conductivity_ms_cm: Option<f64>,
    /// 产品浓度 (g/L)
    pub product_concentration_g_per_l: Option<f64>,
    /// 残留聚合物 (ppm)
    pub polymer_ppm: Option<f64>,
    /// 上游是否要求缓冲液置换
    pub needs_buffer_exchange: bool,
    /// 上游是否要求细微粒精制
    pub needs_polish_filtration: bool,
}

impl FeedSnapshot {
    /// 从物料流与交接记录构建快照
    ///
    /// 固含量不是物料流的派生属性,由调用方(配置或上游模型)另行提供。
    pub fn from_stream(
        stream: &MaterialStream,
        handoff: &HandoffRecord,
        solids_fraction_pct: Option<f64>,
    ) -> Self {
        let volume = stream.volume_l();
        Self {
            volume_l: if volume > 0.0 { Some(volume) } else { None },
            solids_fraction_pct,
            conductivity_ms_cm: handoff.conductivity_ms_cm,
            product_concentration_g_per_l: handoff.product_concentration_g_per_l,
            polymer_ppm: handoff.polymer_ppm,
            needs_buffer_exchange: handoff.needs_buffer_exchange,
            needs_polish_filtration: handoff.needs_polish_filtration,
        }
    }
}

// ==========================================
// StageOutput - 阶段输出
// ==========================================

/// 阶段执行器输出
///
/// 成本先以 (科目, 金额) 对承载,由编排器统一入台账,
/// 保证台账只在一处追加。
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// 产品流(进入下一阶段)
    pub product: MaterialStream,
    /// 废弃/副产流(含 loss:* 显式损耗组分)
    pub waste: MaterialStream,
    /// 交接记录
    pub handoff: HandoffRecord,
    /// 本阶段成本 (科目, USD)
    pub costs: Vec<(CostCategory, f64)>,
    /// 本阶段工艺小时
    pub process_hours: f64,
    /// 说明条目
    pub notes: Vec<AdvisoryNote>,
}

// ==========================================
// 质量守恒校验
// ==========================================

/// 校验阶段输出对进料组分的质量守恒
///
/// # 规则 (Process_Model_Spec 3.2)
/// - 对进料中存在的每个组分 c: product(c) + waste(c) ≤ feed(c) + 容差
/// - 差额须以 waste 流中的 loss:* 组分显式入账(由执行器负责)
/// - 输出中新出现的组分(缓冲液、外加聚合物等)视为声明的外部加入,
///   不参与本校验
/// - 水相载体豁免: 缓冲液的加入/移除属声明的工艺操作,由体积簿记
///   承载,不纳入组分守恒
///
/// # 返回
/// - Ok(()): 守恒成立
/// - Err(MassBalance): 某组分产出超过投入(建模缺陷,立即上抛)
pub fn verify_component_balance(
    stage: StageId,
    feed: &MaterialStream,
    product: &MaterialStream,
    waste: &MaterialStream,
) -> Result<(), EngineError> {
    use crate::domain::stream::components;
    for (component, input_kg) in feed.components() {
        if component == components::WATER {
            continue;
        }
        let output_kg = product.mass_of(component) + waste.mass_of(component);
        let tolerance = input_kg.abs() * 1e-9 + 1e-9;
        if output_kg > input_kg + tolerance {
            return Err(EngineError::MassBalance {
                stage,
                component: component.to_string(),
                input_kg,
                output_kg,
            });
        }
    }
    Ok(())
}
