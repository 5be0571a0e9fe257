// ==========================================
// 生物工艺技术经济评估系统 - 报表导出
// ==========================================
// 依据: TEA_Master_Spec.md - PART F 报表与审计输出
// 职责: 成本分解 CSV 导出,供外部表格工具复核
// 红线: 导出只读台账与结果,不回写任何运行状态
// ==========================================

use crate::engine::PipelineResult;
use chrono::Local;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("CSV 写入失败: {0}")]
    Csv(#[from] csv::Error),

    #[error("文件写入失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 导出成本分解 CSV
///
/// # 布局
/// - 头部元数据行(# 前缀): 运行号、情景、导出时间
/// - 阶段明细: 阶段 / 路线 / 收率 / 工时 / 成本 / 池体积
/// - 科目汇总: 科目 / 金额
/// - 尾部: 总额、单位成本(无定义时留空)
pub fn export_cost_breakdown(result: &PipelineResult, path: &Path) -> Result<(), ReportError> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;

    // 元数据(# 前缀行,表格工具按注释处理)
    writer.write_record(["# run_id", result.run_id.to_string().as_str()])?;
    writer.write_record(["# scenario", result.scenario_name.as_str()])?;
    writer.write_record([
        "# exported_at",
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string().as_str(),
    ])?;

    // 阶段明细
    writer.write_record([
        "section", "stage", "route", "recovery", "hours", "cost_usd", "pool_volume_l",
    ])?;
    for report in &result.stage_reports {
        writer.write_record([
            "stage",
            report.stage.code(),
            report.route.as_deref().unwrap_or(""),
            format!("{:.4}", report.recovery_fraction).as_str(),
            format!("{:.2}", report.process_hours).as_str(),
            format!("{:.2}", report.cost_usd).as_str(),
            format!("{:.1}", report.pool_volume_l).as_str(),
        ])?;
    }

    // 科目汇总
    writer.write_record(["section", "category", "total_usd"])?;
    for (category, total) in &result.totals_by_category {
        writer.write_record(["category", category.as_str(), format!("{:.2}", total).as_str()])?;
    }

    // 尾部合计与分摊
    writer.write_record([
        "total",
        "ledger_total_usd",
        format!("{:.2}", result.ledger.total()).as_str(),
    ])?;
    writer.write_record([
        "allocation",
        result.allocation.basis.as_str(),
        result
            .allocation
            .pooled_per_unit_usd
            .map(|v| format!("{:.4}", v))
            .unwrap_or_default()
            .as_str(),
    ])?;

    writer.flush()?;
    info!(path = %path.display(), "成本分解导出完成");
    Ok(())
}
