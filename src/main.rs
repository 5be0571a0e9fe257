// ==========================================
// 生物工艺技术经济评估系统 - 命令行入口
// ==========================================
// 依据: TEA_Master_Spec.md
// 技术栈: Rust (单线程确定性管线)
// 系统定位: 技术经济评估决策支持
// ==========================================

use anyhow::{Context, Result};
use bioprocess_tea::engine::run_scenarios;
use bioprocess_tea::{
    logging, report, InMemoryConfig, PipelineOrchestrator, PipelineResult, Scenario,
};
use std::path::{Path, PathBuf};

/// 情景文件: 合同/排程口径 + 各阶段工艺配置
///
/// # 布局 (JSON)
/// ```json
/// {
///   "scenarios": [ { "name": "baseline", "batches_executed": 12.0, ... } ],
///   "process_config": { "capture": { "route_override": "bind_elute" } }
/// }
/// ```
#[derive(serde::Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    scenarios: Vec<Scenario>,
    #[serde(default)]
    process_config: serde_json::Value,
}

fn main() -> Result<()> {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} - 决策支持", bioprocess_tea::APP_NAME);
    tracing::info!("系统版本: {}", bioprocess_tea::VERSION);
    tracing::info!("==================================================");

    // 用法: bioprocess-tea [情景 JSON] [导出 CSV 路径]
    let mut args = std::env::args().skip(1);
    let scenario_path = args.next().map(PathBuf::from);
    let export_path = args.next().map(PathBuf::from);

    let (scenarios, cfg) = match scenario_path {
        Some(path) => load_scenario_file(&path)?,
        None => {
            tracing::info!("未指定情景文件,使用内置基线情景");
            (vec![Scenario::default()], InMemoryConfig::new())
        }
    };

    let orchestrator = PipelineOrchestrator::new(cfg);
    let results = run_scenarios(&orchestrator, &scenarios)
        .context("管线运行失败")?;

    for result in &results {
        print_summary(result);
    }

    if let Some(path) = export_path {
        let first = results
            .first()
            .context("无可导出的运行结果")?;
        report::export_cost_breakdown(first, &path).context("成本分解导出失败")?;
        println!("成本分解已导出: {}", path.display());
    }

    Ok(())
}

fn load_scenario_file(path: &Path) -> Result<(Vec<Scenario>, InMemoryConfig)> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("无法读取情景文件: {}", path.display()))?;
    let file: ScenarioFile = serde_json::from_str(&raw)
        .with_context(|| format!("情景文件格式错误: {}", path.display()))?;

    let (cfg, skipped) = InMemoryConfig::from_json(&file.process_config);
    for message in &skipped {
        tracing::warn!("配置项被跳过: {}", message);
    }

    let scenarios = if file.scenarios.is_empty() {
        vec![Scenario::default()]
    } else {
        file.scenarios
    };
    tracing::info!(
        scenario_count = scenarios.len(),
        skipped_config = skipped.len(),
        "情景文件装载完成"
    );
    Ok((scenarios, cfg))
}

fn print_summary(result: &PipelineResult) {
    println!("==================================================");
    println!("情景: {}  (运行号 {})", result.scenario_name, result.run_id);
    println!("--------------------------------------------------");
    println!("阶段            路线                收率     成本(USD)");
    for report in &result.stage_reports {
        println!(
            "{:<14}  {:<18}  {:>6.1}%  {:>12.2}",
            report.stage.code(),
            report.route.as_deref().unwrap_or("-"),
            report.recovery_fraction * 100.0,
            report.cost_usd,
        );
    }
    println!("--------------------------------------------------");
    println!("单批放行产品: {:.2} kg", result.released_product_kg);
    println!("台账总额:     {:.2} USD", result.ledger.total());
    println!(
        "CMO 单批总计: {:.2} USD (标准 {:.2} + 摊销 {:.2})",
        result.cmo_breakdown.grand_total_per_batch_usd,
        result.cmo_breakdown.standard_batch_total_usd,
        result.cmo_breakdown.campaign_adders_total_usd,
    );
    match result.allocation.pooled_per_unit_usd {
        Some(per_unit) => println!(
            "合并分摊:     {:.4} USD / 单位 ({})",
            per_unit,
            result.allocation.basis.title_cn()
        ),
        None => println!(
            "合并分摊:     无定义 (基准 {} 分母为零)",
            result.allocation.basis
        ),
    }
    if !result.notes.is_empty() {
        println!("说明条目 ({} 条):", result.notes.len());
        for note in &result.notes {
            println!("  [{}] {}: {}", note.code, note.stage.code(), note.message);
        }
    }
    println!("==================================================");
}
