//! 编译入口：配置、阶段推进与并行批量降级

use std::fs;
use std::sync::Arc;

use strata::compile::{context_from_config, load_context, lower_batch, lower_graph};
use strata::middle::passes::lowering::SnippetCache;
use strata::middle::{ElementKind, GuardsStage, LoweringContext, NodeKind, SnippetId, TypeUniverse};
use strata::util::config::StrataConfig;
use strata::util::logger;
use strata::vm::{Heap, Outcome};

use crate::common::{copy_args, execute, has_high_level_copy, Shape};

#[test]
fn test_stage_by_stage() {
    logger::init_debug();
    let ctx = LoweringContext::default();
    let (mut graph, copy) = Shape::arrays(ElementKind::Object)
        .src(strata::middle::ObjectStamp::declared(strata::middle::TypeRef::array_of(
            strata::middle::TypeRef::Instance(strata::middle::ClassId(3)),
        )))
        .build();

    let report = lower_graph(&ctx, &mut graph, GuardsStage::FixedDeopts).unwrap();
    assert_eq!(report.expanded_total(), 0);
    assert_eq!(report.waiting, 1);
    assert!(matches!(graph[copy].kind(), NodeKind::DelayedCopy(_)));

    let report = lower_graph(&ctx, &mut graph, GuardsStage::AfterFsa).unwrap();
    assert_eq!(report.expanded_with(SnippetId::Checkcast), 1);
    assert_eq!(report.waiting, 0);
    assert!(!has_high_level_copy(&graph));
}

#[test]
fn test_config_file_enables_loop_expansion() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("strata.toml"),
        "log_level = \"warn\"\n\n[lowering]\ninline_loop_limit = 32\n",
    )
    .unwrap();
    let ctx = load_context(dir.path()).unwrap();
    assert_eq!(ctx.policy().inline_loop_limit, 32);

    // 长度不是常量时仍然走桩调用
    let (mut graph, _) = Shape::arrays(ElementKind::Char).exact().build();
    let report = lower_graph(&ctx, &mut graph, GuardsStage::AfterFsa).unwrap();
    assert_eq!(report.expanded_with(SnippetId::StubCall), 1);

    let mut config = StrataConfig::default();
    config.lowering.expand_arraycopy_loops = true;
    let ctx = context_from_config(&config);
    let (graph, _) = Shape::arrays(ElementKind::Int).same_array().exact().build();
    let mut lowered = graph.clone();
    let report = lower_graph(&ctx, &mut lowered, GuardsStage::AfterFsa).unwrap();
    assert_eq!(report.expanded_with(SnippetId::ExpandedLoopStubCall), 1);

    let types = TypeUniverse::default();
    let mut heap = Heap::new();
    let array = heap.int_array(&[1, 2, 3, 4, 5]);
    let (outcome, heap) = execute(&lowered, &types, &heap, copy_args(array, array, 0, 1, 4));
    assert_eq!(outcome, Outcome::Returned);
    assert_eq!(heap.int_values(array).unwrap(), vec![1, 1, 2, 3, 4]);
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("strata.toml"), "[layout]\nheap_word_size = 0\n").unwrap();
    let err = load_context(dir.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("heap_word_size"));
}

#[test]
fn test_batch_shares_template_cache() {
    let cache = Arc::new(SnippetCache::new());
    let ctx = LoweringContext::default().with_cache(cache.clone());
    let kinds = [ElementKind::Byte, ElementKind::Int, ElementKind::Long, ElementKind::Double];
    let mut graphs: Vec<_> = (0..32)
        .map(|i| Shape::arrays(kinds[i % kinds.len()]).exact().build().0)
        .collect();

    let reports = lower_batch(&ctx, &mut graphs, GuardsStage::AfterFsa).unwrap();
    assert_eq!(reports.len(), 32);
    assert!(reports.iter().all(|r| r.expanded_with(SnippetId::StubCall) == 1));
    assert!(graphs.iter().all(|g| !has_high_level_copy(g)));

    // 同一 (片段, 阶段) 只构建一次
    let stats = cache.stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.hits + stats.misses, 32);
}
