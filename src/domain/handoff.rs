// ==========================================
// 生物工艺技术经济评估系统 - 阶段交接记录
// ==========================================
// 依据: Process_Model_Spec_v0.4.md - 2. Handoff Record
// 职责: 阶段间前向传递的紧凑摘要,供下游路线选择器参考
// 红线: 每阶段产出一次,之后不允许回溯修改
// ==========================================

use crate::domain::types::StageId;
use serde::{Deserialize, Serialize};

// ==========================================
// HandoffRecord - 交接记录
// ==========================================

/// 阶段交接记录
///
/// 捕获阶段无论走哪条技术路线,都必须输出归一化的交接记录,
/// 下游调理逻辑只看标志位,不感知上游技术族。
///
/// 可缺失的理化指标用 Option 表达;缺失时下游按文档化默认值
/// 兜底并追加说明(见 Process_Model_Spec 7.2)。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    /// 产出该记录的阶段
    pub stage: StageId,
    /// 收集池体积 (L)
    pub pool_volume_l: f64,
    /// 产品浓度 (g/L)
    pub product_concentration_g_per_l: Option<f64>,
    /// 电导率 (mS/cm)
    pub conductivity_ms_cm: Option<f64>,
    /// pH
    pub ph: Option<f64>,
    /// 残留核酸 (ppm)
    pub dna_ppm: Option<f64>,
    /// 残留聚合物 (ppm)
    pub polymer_ppm: Option<f64>,
    /// 本阶段回收率 (0~1)
    pub recovery_fraction: f64,
    /// 是否需要下游缓冲液置换
    pub needs_buffer_exchange: bool,
    /// 是否需要下游细微粒精制过滤
    pub needs_polish_filtration: bool,
}

impl HandoffRecord {
    /// 管线起点的基线交接记录(外部供料描述之外无任何历史)
    pub fn initial(stage: StageId, pool_volume_l: f64) -> Self {
        Self {
            stage,
            pool_volume_l,
            product_concentration_g_per_l: None,
            conductivity_ms_cm: None,
            ph: None,
            dna_ppm: None,
            polymer_ppm: None,
            recovery_fraction: 1.0,
            needs_buffer_exchange: false,
            needs_polish_filtration: false,
        }
    }

    /// 直通阶段的前向转发:指标原样保留,仅更新产出阶段标记
    pub fn forwarded_by(&self, stage: StageId) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    /// 是否需要任何后续处理(缓冲液置换或精制过滤)
    pub fn needs_further_processing(&self) -> bool {
        self.needs_buffer_exchange || self.needs_polish_filtration
    }
}
