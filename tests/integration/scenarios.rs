//! 端到端场景：分类、展开后的执行结果与原始高层拷贝一致

use strata::middle::passes::lowering::lower;
use strata::middle::{
    ClassId, DeoptAction, DeoptReason, ElementKind, Graph, GuardsStage, LoweringContext, NodeKind,
    ObjectStamp, RuntimeTarget, SnippetId, TypeRef, TypeUniverse,
};
use strata::vm::{GuestException, Heap, Outcome, Value};

use crate::common::{copy_args, execute, has_high_level_copy, lower_fully, Shape, COPY_BCI};

fn transfer_kind(graph: &Graph) -> Option<NodeKind> {
    graph
        .fixed_chain()
        .into_iter()
        .map(|id| graph[id].kind().clone())
        .find(|kind| kind.residual_call_bci().is_some() || matches!(kind, NodeKind::CopyLoop { .. }))
}

#[test]
fn test_int_array_into_object_checks_hub_at_runtime() {
    let types = TypeUniverse::default();
    let (graph, _) = Shape::arrays(ElementKind::Int)
        .dest(ObjectStamp::declared(TypeRef::Root).non_null())
        .build();
    let (lowered, report) = lower_fully(&LoweringContext::default(), &graph);
    assert_eq!(report.expanded_with(SnippetId::StubCall), 1);
    assert!(!has_high_level_copy(&lowered));

    let mut heap = Heap::new();
    let src = heap.int_array(&[7, 8, 9]);
    let ints = heap.int_array(&[0, 0, 0]);
    let doubles = heap.new_array(TypeRef::PrimitiveArray(ElementKind::Double), 3).unwrap();

    let (outcome, after) = execute(&lowered, &types, &heap, copy_args(src, ints, 0, 0, 3));
    assert_eq!(outcome, Outcome::Returned);
    assert_eq!(after.int_values(ints).unwrap(), vec![7, 8, 9]);

    // 目标在运行时是 double[]：hub 不同，去优化后由解释器抛出
    let (outcome, after) = execute(&lowered, &types, &heap, copy_args(src, doubles, 0, 0, 3));
    assert_eq!(
        outcome,
        Outcome::Deoptimized {
            reason: DeoptReason::RuntimeConstraint,
            action: DeoptAction::InvalidateReprofile,
            bci: Some(COPY_BCI),
        }
    );
    assert_eq!(after, heap);
    let (outcome, _) = execute(&graph, &types, &heap, copy_args(src, doubles, 0, 0, 3));
    assert_eq!(outcome, Outcome::Exception(GuestException::ArrayStore));
}

#[test]
fn test_mismatched_primitive_arrays_raise_through_native_path() {
    let types = TypeUniverse::default();
    let (graph, _) = Shape::arrays(ElementKind::Int)
        .dest(ObjectStamp::declared(TypeRef::PrimitiveArray(ElementKind::Double)).non_null())
        .with_handler()
        .build();
    let (lowered, report) = lower_fully(&LoweringContext::default(), &graph);
    assert_eq!(report.expanded_with(SnippetId::NativeExceptionPath), 1);
    assert!(matches!(
        transfer_kind(&lowered),
        Some(NodeKind::RuntimeCall {
            target: RuntimeTarget::CheckedArraycopy,
            ..
        })
    ));

    let mut heap = Heap::new();
    let src = heap.int_array(&[1, 2]);
    let dest = heap.new_array(TypeRef::PrimitiveArray(ElementKind::Double), 2).unwrap();
    let (outcome, after) = execute(&lowered, &types, &heap, copy_args(src, dest, 0, 0, 2));
    assert_eq!(outcome, Outcome::Exception(GuestException::ArrayStore));
    assert_eq!(after, heap);
}

#[test]
fn test_bounds_order_reports_src_pos_first() {
    let types = TypeUniverse::default();
    let (graph, _) = Shape::arrays(ElementKind::Int).exact().build();
    let (lowered, _) = lower_fully(&LoweringContext::default(), &graph);
    let mut heap = Heap::new();
    let src = heap.int_array(&[1, 2, 3]);
    let dest = heap.int_array(&[0, 0, 0]);
    let (outcome, after) = execute(&lowered, &types, &heap, copy_args(src, dest, -1, 0, -1));
    assert_eq!(
        outcome,
        Outcome::Deoptimized {
            reason: DeoptReason::BoundsCheckException,
            action: DeoptAction::InvalidateReprofile,
            bci: Some(COPY_BCI),
        }
    );
    assert_eq!(after, heap);
}

#[test]
fn test_null_operand_deopts_before_any_write() {
    let types = TypeUniverse::default();
    let (graph, _) = Shape::arrays(ElementKind::Long)
        .src(ObjectStamp::declared(TypeRef::PrimitiveArray(ElementKind::Long)))
        .build();
    let (lowered, _) = lower_fully(&LoweringContext::default(), &graph);
    let mut heap = Heap::new();
    let dest = heap.new_array(TypeRef::PrimitiveArray(ElementKind::Long), 2).unwrap();
    let args = vec![Value::NULL, Value::Ref(Some(dest)), Value::Int(0), Value::Int(0), Value::Int(1)];
    let (outcome, _) = execute(&lowered, &types, &heap, args.clone());
    assert!(matches!(
        outcome,
        Outcome::Deoptimized {
            reason: DeoptReason::NullCheckException,
            ..
        }
    ));
    let (outcome, _) = execute(&graph, &types, &heap, args);
    assert_eq!(outcome, Outcome::Exception(GuestException::NullPointer));
}

#[test]
fn test_checkcast_copy_partial_store_failure() {
    let mut types = TypeUniverse::default();
    let number = types.define_class("Number", None);
    let integer = types.define_class("Integer", Some(number));
    let string = types.define_class("String", None);
    let numbers = TypeRef::array_of(TypeRef::Instance(number));

    let (graph, _) = Shape::arrays(ElementKind::Object)
        .src(ObjectStamp::declared(TypeRef::array_of(TypeRef::Root)).non_null())
        .dest(ObjectStamp::declared(numbers.clone()).non_null())
        .with_handler()
        .build();
    let ctx = LoweringContext::default();

    let mut staged = graph.clone();
    staged.set_stage(GuardsStage::FixedDeopts).unwrap();
    lower(&ctx, &mut staged).unwrap();
    assert!(has_high_level_copy(&staged), "checkcast copies wait for AfterFsa");

    let (lowered, report) = lower_fully(&ctx, &graph);
    assert_eq!(report.expanded_with(SnippetId::Checkcast), 1);
    assert!(matches!(transfer_kind(&lowered), Some(NodeKind::CheckcastCopy { .. })));

    let mut heap = Heap::new();
    let values = vec![
        Value::Ref(Some(heap.alloc_instance(integer))),
        Value::NULL,
        Value::Ref(Some(heap.alloc_instance(string))),
        Value::Ref(Some(heap.alloc_instance(integer))),
    ];
    let src = heap.alloc_array(TypeRef::array_of(TypeRef::Root), values.clone()).unwrap();
    let dest = heap.new_array(numbers, 4).unwrap();
    let args = copy_args(src, dest, 0, 0, 4);

    let (before, raw_heap) = execute(&graph, &types, &heap, args.clone());
    let (after, lowered_heap) = execute(&lowered, &types, &heap, args);
    assert_eq!(before, Outcome::Exception(GuestException::ArrayStore));
    assert_eq!(after, before);
    assert_eq!(lowered_heap, raw_heap);
    assert_eq!(&lowered_heap.elements(dest).unwrap()[..2], &values[..2]);
    assert_eq!(lowered_heap.elements(dest).unwrap()[2], Value::NULL);
}

#[test]
fn test_unknown_types_use_generic_runtime_copy() {
    let types = TypeUniverse::default();
    let (graph, _) = Shape::arrays(ElementKind::Object)
        .src(ObjectStamp::unknown())
        .dest(ObjectStamp::unknown())
        .build();
    let (lowered, report) = lower_fully(&LoweringContext::default(), &graph);
    assert_eq!(report.expanded_with(SnippetId::Generic), 1);
    assert!(matches!(
        transfer_kind(&lowered),
        Some(NodeKind::RuntimeCall {
            target: RuntimeTarget::GenericArraycopy,
            ..
        })
    ));

    let mut heap = Heap::new();
    let src = heap.int_array(&[4, 5, 6]);
    let dest = heap.int_array(&[0, 0, 0]);
    let (outcome, after) = execute(&lowered, &types, &heap, copy_args(src, dest, 1, 0, 2));
    assert_eq!(outcome, Outcome::Returned);
    assert_eq!(after.int_values(dest).unwrap(), vec![5, 6, 0]);
}

#[test]
fn test_generic_copy_matches_unlowered_on_bad_operands() {
    let mut types = TypeUniverse::default();
    let point = types.define_class("Point", None);
    let (graph, _) = Shape::arrays(ElementKind::Object)
        .src(ObjectStamp::unknown().non_null())
        .dest(ObjectStamp::unknown().non_null())
        .build();
    let (lowered, report) = lower_fully(&LoweringContext::default(), &graph);
    assert_eq!(report.expanded_with(SnippetId::Generic), 1);
    assert!(!has_high_level_copy(&lowered));

    let mut heap = Heap::new();
    let instance = heap.alloc_instance(point);
    let ints = heap.int_array(&[1, 2]);
    let longs = heap.new_array(TypeRef::PrimitiveArray(ElementKind::Long), 2).unwrap();
    let cases = [
        ("instance source", copy_args(instance, ints, 0, 0, 1)),
        ("instance destination", copy_args(ints, instance, 0, 0, 1)),
        ("int[] into long[]", copy_args(ints, longs, 0, 0, 2)),
    ];
    for (name, args) in cases {
        let (before, raw_heap) = execute(&graph, &types, &heap, args.clone());
        let (after, lowered_heap) = execute(&lowered, &types, &heap, args);
        assert_eq!(before, Outcome::Exception(GuestException::ArrayStore), "{}", name);
        assert_eq!(after, before, "{}", name);
        assert_eq!(raw_heap, heap, "{}", name);
        assert_eq!(lowered_heap, heap, "{}", name);
    }
}

#[test]
fn test_generic_copy_null_operand_matches_unlowered() {
    let types = TypeUniverse::default();
    let (graph, _) = Shape::arrays(ElementKind::Object)
        .src(ObjectStamp::unknown())
        .dest(ObjectStamp::unknown())
        .build();
    let (lowered, _) = lower_fully(&LoweringContext::default(), &graph);

    let mut heap = Heap::new();
    let ints = heap.int_array(&[1, 2]);
    let args = vec![Value::Ref(Some(ints)), Value::NULL, Value::Int(0), Value::Int(0), Value::Int(1)];
    let (before, _) = execute(&graph, &types, &heap, args.clone());
    let (after, lowered_heap) = execute(&lowered, &types, &heap, args);
    assert_eq!(before, Outcome::Exception(GuestException::NullPointer));
    assert_eq!(after, before);
    assert_eq!(lowered_heap, heap);
}

#[test]
fn test_class_instances_are_not_arrays() {
    let (graph, _) = Shape::arrays(ElementKind::Int)
        .src(ObjectStamp::declared(TypeRef::Instance(ClassId(0))).non_null())
        .build();
    let (_, report) = lower_fully(&LoweringContext::default(), &graph);
    assert_eq!(report.expanded_with(SnippetId::NativeExceptionPath), 1);
}
