// ==========================================
// 生物工艺技术经济评估系统 - 领域类型定义
// ==========================================
// 依据: TEA_Master_Spec.md - PART B 工艺路线体系
// 依据: Process_Model_Spec_v0.4.md - 0.2 成本科目全集
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 工艺阶段 (Stage Id)
// ==========================================
// 红线: 阶段顺序固定,不允许运行时重排
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageId {
    SeedGrowth,    // 种子扩培
    Fermentation,  // 发酵
    CellRemoval,   // 除菌体
    Concentration, // 浓缩
    Capture,       // 产品捕获
    Conditioning,  // 调理(缓冲液置换)
    Polish,        // 精制
    FinalForm,     // 成品干燥
}

impl StageId {
    /// 全部阶段,按管线执行顺序
    pub const ALL: [StageId; 8] = [
        StageId::SeedGrowth,
        StageId::Fermentation,
        StageId::CellRemoval,
        StageId::Concentration,
        StageId::Capture,
        StageId::Conditioning,
        StageId::Polish,
        StageId::FinalForm,
    ];

    /// 配置键前缀(snake_case,与配置表一致)
    pub fn code(&self) -> &'static str {
        match self {
            StageId::SeedGrowth => "seed_growth",
            StageId::Fermentation => "fermentation",
            StageId::CellRemoval => "cell_removal",
            StageId::Concentration => "concentration",
            StageId::Capture => "capture",
            StageId::Conditioning => "conditioning",
            StageId::Polish => "polish",
            StageId::FinalForm => "final_form",
        }
    }

    /// 中文名称(用于日志与报表)
    pub fn title_cn(&self) -> &'static str {
        match self {
            StageId::SeedGrowth => "种子扩培",
            StageId::Fermentation => "发酵",
            StageId::CellRemoval => "除菌体",
            StageId::Concentration => "浓缩",
            StageId::Capture => "产品捕获",
            StageId::Conditioning => "调理",
            StageId::Polish => "精制",
            StageId::FinalForm => "成品干燥",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ==========================================
// 成本科目 (Cost Category)
// ==========================================
// 依据: Process_Model_Spec 0.2 - 成本科目只增不改
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostCategory {
    RawMaterials,       // 原辅料
    MembraneConsumable, // 膜耗材
    ResinConsumable,    // 层析树脂/捕获介质
    BufferReagent,      // 缓冲液/试剂
    Utilities,          // 公用工程
    CmoStandardFee,     // CMO 标准批费
    CmoCampaignFee,     // CMO 批次组摊销费
    CmoRetainerFee,     // CMO 产能保留费
}

impl CostCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::RawMaterials => "RAW_MATERIALS",
            CostCategory::MembraneConsumable => "MEMBRANE_CONSUMABLE",
            CostCategory::ResinConsumable => "RESIN_CONSUMABLE",
            CostCategory::BufferReagent => "BUFFER_REAGENT",
            CostCategory::Utilities => "UTILITIES",
            CostCategory::CmoStandardFee => "CMO_STANDARD_FEE",
            CostCategory::CmoCampaignFee => "CMO_CAMPAIGN_FEE",
            CostCategory::CmoRetainerFee => "CMO_RETAINER_FEE",
        }
    }

    pub fn title_cn(&self) -> &'static str {
        match self {
            CostCategory::RawMaterials => "原辅料",
            CostCategory::MembraneConsumable => "膜耗材",
            CostCategory::ResinConsumable => "树脂耗材",
            CostCategory::BufferReagent => "缓冲液试剂",
            CostCategory::Utilities => "公用工程",
            CostCategory::CmoStandardFee => "CMO标准批费",
            CostCategory::CmoCampaignFee => "CMO批次组摊销",
            CostCategory::CmoRetainerFee => "CMO产能保留费",
        }
    }
}

impl fmt::Display for CostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 分摊基准 (Allocation Basis)
// ==========================================
// 依据: Process_Model_Spec 10.2 - 分摊分母四选一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationBasis {
    MassReleased,        // 放行产品总质量
    GoodBatchesReleased, // 放行合格批次数
    ScheduledCapacity,   // 计划产能批次数
    ProcessHours,        // 累计工艺小时
}

impl AllocationBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationBasis::MassReleased => "mass_released",
            AllocationBasis::GoodBatchesReleased => "good_batches_released",
            AllocationBasis::ScheduledCapacity => "scheduled_capacity",
            AllocationBasis::ProcessHours => "process_hours",
        }
    }

    pub fn title_cn(&self) -> &'static str {
        match self {
            AllocationBasis::MassReleased => "按放行质量",
            AllocationBasis::GoodBatchesReleased => "按合格批次",
            AllocationBasis::ScheduledCapacity => "按计划产能",
            AllocationBasis::ProcessHours => "按工艺小时",
        }
    }
}

impl Default for AllocationBasis {
    fn default() -> Self {
        AllocationBasis::MassReleased
    }
}

impl fmt::Display for AllocationBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AllocationBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mass_released" => Ok(AllocationBasis::MassReleased),
            "good_batches_released" => Ok(AllocationBasis::GoodBatchesReleased),
            "scheduled_capacity" => Ok(AllocationBasis::ScheduledCapacity),
            "process_hours" => Ok(AllocationBasis::ProcessHours),
            other => Err(format!("未知分摊基准: {}", other)),
        }
    }
}

// ==========================================
// 除菌体路线 (Cell Removal Route)
// ==========================================
// 依据: Process_Model_Spec 3.1 - 除菌体三条路线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellRemovalRoute {
    Centrifuge,  // 碟片离心(最稳健,高固含量适用)
    DepthFilter, // 深层过滤
    Membrane,    // 微滤膜(最简路线,默认)
}

impl CellRemovalRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellRemovalRoute::Centrifuge => "centrifuge",
            CellRemovalRoute::DepthFilter => "depth_filter",
            CellRemovalRoute::Membrane => "membrane",
        }
    }
}

impl fmt::Display for CellRemovalRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CellRemovalRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "centrifuge" => Ok(CellRemovalRoute::Centrifuge),
            "depth_filter" => Ok(CellRemovalRoute::DepthFilter),
            "membrane" => Ok(CellRemovalRoute::Membrane),
            other => Err(format!("未知除菌体路线: {}", other)),
        }
    }
}

// ==========================================
// 浓缩路线 (Concentration Route)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcentrationRoute {
    BatchUf,       // 批式超滤(默认)
    SinglePassTff, // 单程切向流
    Evaporator,    // 降膜蒸发(热稳定产品)
}

impl ConcentrationRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcentrationRoute::BatchUf => "batch_uf",
            ConcentrationRoute::SinglePassTff => "single_pass_tff",
            ConcentrationRoute::Evaporator => "evaporator",
        }
    }
}

impl fmt::Display for ConcentrationRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConcentrationRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "batch_uf" => Ok(ConcentrationRoute::BatchUf),
            "single_pass_tff" => Ok(ConcentrationRoute::SinglePassTff),
            "evaporator" => Ok(ConcentrationRoute::Evaporator),
            other => Err(format!("未知浓缩路线: {}", other)),
        }
    }
}

// ==========================================
// 捕获路线 (Capture Route)
// ==========================================
// 两个结构不同的技术族,输出统一交接记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureRoute {
    BindElute,         // 结合-洗脱层析
    PolymerCoacervate, // 聚合物凝聚捕获
}

impl CaptureRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureRoute::BindElute => "bind_elute",
            CaptureRoute::PolymerCoacervate => "polymer_coacervate",
        }
    }
}

impl fmt::Display for CaptureRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CaptureRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bind_elute" => Ok(CaptureRoute::BindElute),
            "polymer_coacervate" => Ok(CaptureRoute::PolymerCoacervate),
            other => Err(format!("未知捕获路线: {}", other)),
        }
    }
}

// ==========================================
// 调理路线 (Conditioning Route)
// ==========================================
// 由上游交接记录的标志位驱动选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditioningRoute {
    Diafiltration,    // 恒容洗滤(缓冲液置换)
    SinglePassFilter, // 单程过滤(聚合物残留去除)
    ContinuousFilter, // 连续过滤
    PassThrough,      // 直通(无需调理)
}

impl ConditioningRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditioningRoute::Diafiltration => "diafiltration",
            ConditioningRoute::SinglePassFilter => "single_pass_filter",
            ConditioningRoute::ContinuousFilter => "continuous_filter",
            ConditioningRoute::PassThrough => "pass_through",
        }
    }
}

impl fmt::Display for ConditioningRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConditioningRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "diafiltration" => Ok(ConditioningRoute::Diafiltration),
            "single_pass_filter" => Ok(ConditioningRoute::SinglePassFilter),
            "continuous_filter" => Ok(ConditioningRoute::ContinuousFilter),
            "pass_through" => Ok(ConditioningRoute::PassThrough),
            other => Err(format!("未知调理路线: {}", other)),
        }
    }
}

// ==========================================
// 精制路线 (Polish Route)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolishRoute {
    FinePolishFilter, // 细微粒精制过滤
    SterileFilter,    // 除菌过滤
    PassThrough,      // 直通
}

impl PolishRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolishRoute::FinePolishFilter => "fine_polish_filter",
            PolishRoute::SterileFilter => "sterile_filter",
            PolishRoute::PassThrough => "pass_through",
        }
    }
}

impl fmt::Display for PolishRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PolishRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fine_polish_filter" => Ok(PolishRoute::FinePolishFilter),
            "sterile_filter" => Ok(PolishRoute::SterileFilter),
            "pass_through" => Ok(PolishRoute::PassThrough),
            other => Err(format!("未知精制路线: {}", other)),
        }
    }
}

// ==========================================
// 成品路线 (Final Form Route)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalFormRoute {
    SprayDryer, // 喷雾干燥(默认)
    TrayDryer,  // 盘式干燥
    LiquidFill, // 液体灌装(不干燥)
}

impl FinalFormRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalFormRoute::SprayDryer => "spray_dryer",
            FinalFormRoute::TrayDryer => "tray_dryer",
            FinalFormRoute::LiquidFill => "liquid_fill",
        }
    }
}

impl fmt::Display for FinalFormRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FinalFormRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spray_dryer" => Ok(FinalFormRoute::SprayDryer),
            "tray_dryer" => Ok(FinalFormRoute::TrayDryer),
            "liquid_fill" => Ok(FinalFormRoute::LiquidFill),
            other => Err(format!("未知成品路线: {}", other)),
        }
    }
}

// ==========================================
// 路线覆写 (Route Override)
// ==========================================
// 依据: Process_Model_Spec 2.1 - "automatic" 哨兵值必须在执行前解析
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOverride<R> {
    /// 自动:由选择器按固定优先级启发式解析
    Auto,
    /// 显式指定:原样返回,不套用启发式
    Explicit(R),
}

impl<R> Default for RouteOverride<R> {
    fn default() -> Self {
        RouteOverride::Auto
    }
}

impl<R: std::str::FromStr<Err = String>> RouteOverride<R> {
    /// 从配置字符串解析覆写值
    ///
    /// # 规则
    /// - None / "auto" / 空串 → Auto
    /// - 其余 → 按具体路线枚举解析,解析失败返回 Err
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        match raw {
            None => Ok(RouteOverride::Auto),
            Some(s) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("auto") => {
                Ok(RouteOverride::Auto)
            }
            Some(s) => Ok(RouteOverride::Explicit(s.parse::<R>()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_pipeline_order() {
        assert_eq!(StageId::ALL.first(), Some(&StageId::SeedGrowth));
        assert_eq!(StageId::ALL.last(), Some(&StageId::FinalForm));
        // Ord 派生顺序与管线顺序一致
        assert!(StageId::CellRemoval < StageId::Capture);
    }

    #[test]
    fn test_route_override_parse_auto() {
        let parsed = RouteOverride::<CellRemovalRoute>::parse(None).unwrap();
        assert_eq!(parsed, RouteOverride::Auto);
        let parsed = RouteOverride::<CellRemovalRoute>::parse(Some("auto")).unwrap();
        assert_eq!(parsed, RouteOverride::Auto);
        let parsed = RouteOverride::<CellRemovalRoute>::parse(Some("  ")).unwrap();
        assert_eq!(parsed, RouteOverride::Auto);
    }

    #[test]
    fn test_route_override_parse_explicit() {
        let parsed = RouteOverride::<CaptureRoute>::parse(Some("polymer_coacervate")).unwrap();
        assert_eq!(parsed, RouteOverride::Explicit(CaptureRoute::PolymerCoacervate));
    }

    #[test]
    fn test_route_override_parse_unknown_is_error() {
        let parsed = RouteOverride::<CaptureRoute>::parse(Some("magnetic_beads"));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_allocation_basis_from_str() {
        assert_eq!(
            "process_hours".parse::<AllocationBasis>().unwrap(),
            AllocationBasis::ProcessHours
        );
        assert!("per_gram".parse::<AllocationBasis>().is_err());
    }
}
