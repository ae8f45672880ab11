//! 编译入口
//!
//! 把配置、上下文与降级阶段串起来；对外返回 `anyhow::Result`，
//! 错误链上标明是哪一张图出了问题。

use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::middle::core::graph::Graph;
use crate::middle::core::stage::GuardsStage;
use crate::middle::core::types::TypeUniverse;
use crate::middle::passes::lowering::{lower_through, LoweringContext, LoweringReport, StubRegistry};
use crate::util::config::StrataConfig;
use crate::util::logger;

/// 按配置构造降级上下文（默认桩表）
pub fn context_from_config(config: &StrataConfig) -> LoweringContext {
    LoweringContext::new(
        StubRegistry::with_defaults(),
        TypeUniverse::new(config.layout.layout()),
        config.lowering.policy(),
    )
}

/// 读取目录下的 `strata.toml`，按其中的 `log_level` 初始化日志并构造上下文
pub fn load_context(dir: &Path) -> Result<LoweringContext> {
    let config = StrataConfig::load_from_dir(dir)
        .with_context(|| format!("Failed to load config from {}", dir.display()))?;
    logger::init_from_config(&config);
    debug!(dir = %dir.display(), level = ?config.log_level, "config loaded");
    Ok(context_from_config(&config))
}

/// 把一张图降级到 `target` 阶段
pub fn lower_graph(
    ctx: &LoweringContext,
    graph: &mut Graph,
    target: GuardsStage,
) -> Result<LoweringReport> {
    let name = graph.name().to_string();
    let report = lower_through(ctx, graph, target)
        .with_context(|| format!("Failed to lower graph `{}` to {}", name, target))?;
    debug!(graph = %name, %report, "lowered");
    Ok(report)
}

/// 并行降级多张互不相关的图
///
/// 所有图共享同一个上下文，因而共享模板缓存。任一张失败时返回第一个错误，
/// 其余图可能已经部分降级。
pub fn lower_batch(
    ctx: &LoweringContext,
    graphs: &mut [Graph],
    target: GuardsStage,
) -> Result<Vec<LoweringReport>> {
    let reports = graphs
        .par_iter_mut()
        .map(|graph| lower_graph(ctx, graph, target))
        .collect::<Result<Vec<_>>>()?;
    let expanded: usize = reports.iter().map(LoweringReport::expanded_total).sum();
    info!(graphs = reports.len(), expanded, cache = ?ctx.cache().stats(), "batch lowered");
    Ok(reports)
}
