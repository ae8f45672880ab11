//! 参考执行器测试
//!
//! 高层拷贝的客体语义，以及未经校验的低层节点的前置条件。

use crate::middle::core::graph::Graph;
use crate::middle::core::kind::{ElementKind, ValueKind};
use crate::middle::core::location::LocationIdentity;
use crate::middle::core::node::{
    ArithOp, CompareOp, DeoptAction, DeoptReason, NodeKind, StubDescriptor, Traversal,
};
use crate::middle::core::types::{ObjectStamp, Stamp, TypeRef, TypeUniverse};
use crate::middle::passes::tests::{CopyBuilder, CopyFixture};
use crate::vm::{run, Executor, GuestException, Heap, Outcome, VMError, Value};

fn refs(objects: &[crate::vm::ObjectRef]) -> Vec<Value> {
    objects.iter().map(|r| Value::Ref(Some(*r))).collect()
}

/// 把拷贝节点的载荷换成 `kind`，输入不变
fn swap_copy(
    fixture: &mut CopyFixture,
    kind: NodeKind,
) {
    fixture.graph.replace_kind(fixture.copy, kind).unwrap();
}

#[test]
fn test_overlapping_copy_behaves_like_memmove() {
    let types = TypeUniverse::default();
    let fixture = CopyBuilder::new(ElementKind::Int)
        .same_array()
        .offsets(0, 1)
        .length(4)
        .build();
    let mut heap = Heap::new();
    let array = heap.int_array(&[1, 2, 3, 4, 5]);
    let outcome = run(&fixture.graph, &types, &mut heap, refs(&[array])).unwrap();
    assert_eq!(outcome, Outcome::Returned);
    assert_eq!(heap.int_values(array).unwrap(), vec![1, 1, 2, 3, 4]);
}

#[test]
fn test_null_operand_raises_npe() {
    let types = TypeUniverse::default();
    let fixture = CopyBuilder::new(ElementKind::Int).offsets(0, 0).length(1).build();
    let mut heap = Heap::new();
    let dest = heap.int_array(&[0]);
    let outcome = run(&fixture.graph, &types, &mut heap, vec![Value::NULL, Value::Ref(Some(dest))]).unwrap();
    assert_eq!(outcome, Outcome::Exception(GuestException::NullPointer));
}

#[test]
fn test_exception_flows_through_handler() {
    let types = TypeUniverse::default();
    let fixture = CopyBuilder::new(ElementKind::Int)
        .offsets(-1, 0)
        .length(1)
        .with_handler()
        .build();
    let mut heap = Heap::new();
    let (src, dest) = (heap.int_array(&[1]), heap.int_array(&[0]));
    let mut executor = Executor::new(&fixture.graph, &types, refs(&[src, dest]));
    let outcome = executor.run(&mut heap).unwrap();
    assert_eq!(outcome, Outcome::Exception(GuestException::ArrayIndexOutOfBounds));
    // copy, handler, handler 后的 Return
    assert_eq!(executor.steps(), 3);
    assert_eq!(heap.int_values(dest).unwrap(), vec![0]);
}

#[test]
fn test_incompatible_primitive_arrays_leave_memory_untouched() {
    let types = TypeUniverse::default();
    let fixture = CopyBuilder::new(ElementKind::Int).offsets(0, 0).length(2).build();
    let mut heap = Heap::new();
    let src = heap.int_array(&[1, 2]);
    let dest = heap.new_array(TypeRef::PrimitiveArray(ElementKind::Double), 2).unwrap();
    let before = heap.clone();
    let outcome = run(&fixture.graph, &types, &mut heap, refs(&[src, dest])).unwrap();
    assert_eq!(outcome, Outcome::Exception(GuestException::ArrayStore));
    assert_eq!(heap, before);
}

#[test]
fn test_store_check_keeps_copied_prefix() {
    let mut types = TypeUniverse::default();
    let number = types.define_class("Number", None);
    let integer = types.define_class("Integer", Some(number));
    let string = types.define_class("String", None);

    let fixture = CopyBuilder::new(ElementKind::Object)
        .src(ObjectStamp::declared(TypeRef::array_of(TypeRef::Root)))
        .dest(ObjectStamp::declared(TypeRef::array_of(TypeRef::Instance(number))))
        .offsets(0, 0)
        .length(3)
        .build();
    let mut heap = Heap::new();
    let values = vec![
        Value::Ref(Some(heap.alloc_instance(integer))),
        Value::Ref(Some(heap.alloc_instance(string))),
        Value::Ref(Some(heap.alloc_instance(integer))),
    ];
    let src = heap.alloc_array(TypeRef::array_of(TypeRef::Root), values.clone()).unwrap();
    let dest = heap.new_array(TypeRef::array_of(TypeRef::Instance(number)), 3).unwrap();

    let outcome = run(&fixture.graph, &types, &mut heap, refs(&[src, dest])).unwrap();
    assert_eq!(outcome, Outcome::Exception(GuestException::ArrayStore));
    assert_eq!(heap.elements(dest).unwrap(), &[values[0].clone(), Value::NULL, Value::NULL][..]);
}

#[test]
fn test_guard_failure_reports_frame_state() {
    let types = TypeUniverse::default();
    let mut graph = Graph::new("guard");
    let x = graph.parameter(0, Stamp::Int);
    let zero = graph.int(0);
    let negative = graph.unique(
        NodeKind::Compare {
            op: CompareOp::Lt,
            kind: ValueKind::Int,
        },
        &[x, zero],
    );
    let guard = graph.append(
        NodeKind::FixedGuard {
            reason: DeoptReason::BoundsCheckException,
            action: DeoptAction::InvalidateReprofile,
            negated: true,
        },
        &[negative],
    );
    let state = graph.frame_state(3);
    graph.set_state_after(guard, Some(state));
    graph.append(NodeKind::Return, &[]);

    let mut heap = Heap::new();
    assert_eq!(run(&graph, &types, &mut heap, vec![Value::Int(5)]).unwrap(), Outcome::Returned);
    assert_eq!(
        run(&graph, &types, &mut heap, vec![Value::Int(-5)]).unwrap(),
        Outcome::Deoptimized {
            reason: DeoptReason::BoundsCheckException,
            action: DeoptAction::InvalidateReprofile,
            bci: Some(3),
        }
    );
    assert_eq!(run(&graph, &types, &mut heap, vec![]).unwrap_err(), VMError::MissingArgument(0));
}

#[test]
fn test_division_by_zero_is_a_vm_error() {
    let types = TypeUniverse::default();
    let mut graph = Graph::new("div");
    let x = graph.parameter(0, Stamp::Int);
    let zero = graph.int(0);
    let quotient = graph.unique(
        NodeKind::Binary {
            op: ArithOp::Div,
            kind: ValueKind::Int,
        },
        &[x, zero],
    );
    let is_zero = graph.unique(
        NodeKind::Compare {
            op: CompareOp::Eq,
            kind: ValueKind::Int,
        },
        &[quotient, zero],
    );
    graph.append(
        NodeKind::FixedGuard {
            reason: DeoptReason::RuntimeConstraint,
            action: DeoptAction::None,
            negated: false,
        },
        &[is_zero],
    );
    graph.append(NodeKind::Return, &[]);
    let err = run(&graph, &types, &mut Heap::new(), vec![Value::Int(1)]).unwrap_err();
    assert_eq!(err, VMError::DivisionByZero(quotient));
}

#[test]
fn test_copy_loop_direction_on_overlap() {
    let types = TypeUniverse::default();
    let cases = [
        (Traversal::Forward, vec![1, 1, 1, 1, 1]),
        (Traversal::Backward, vec![1, 1, 2, 3, 4]),
        (Traversal::Dynamic, vec![1, 1, 2, 3, 4]),
    ];
    for (traversal, expected) in cases {
        let mut fixture = CopyBuilder::new(ElementKind::Int)
            .same_array()
            .offsets(0, 1)
            .length(4)
            .build();
        swap_copy(
            &mut fixture,
            NodeKind::CopyLoop {
                kind: ElementKind::Int,
                traversal,
                location: LocationIdentity::array(ElementKind::Int),
            },
        );
        let mut heap = Heap::new();
        let array = heap.int_array(&[1, 2, 3, 4, 5]);
        run(&fixture.graph, &types, &mut heap, refs(&[array])).unwrap();
        assert_eq!(heap.int_values(array).unwrap(), expected, "{:?}", traversal);
    }
}

#[test]
fn test_unchecked_stub_out_of_bounds() {
    let types = TypeUniverse::default();
    let mut fixture = CopyBuilder::new(ElementKind::Int).offsets(1, 0).length(2).build();
    swap_copy(
        &mut fixture,
        NodeKind::StubCall {
            stub: StubDescriptor {
                name: "jint_arraycopy".to_string(),
                kind: ElementKind::Int,
                aligned: false,
                disjoint: false,
                uninitialized: false,
                killed: LocationIdentity::array(ElementKind::Int),
            },
            bci: 7,
        },
    );
    let mut heap = Heap::new();
    let (src, dest) = (heap.int_array(&[1, 2]), heap.int_array(&[0, 0]));
    let err = run(&fixture.graph, &types, &mut heap, refs(&[src, dest])).unwrap_err();
    assert!(matches!(
        err,
        VMError::UncheckedOutOfBounds {
            src_pos: 1,
            length: 2,
            src_length: 2,
            ..
        }
    ));
}

#[test]
fn test_load_element_hub() {
    let mut types = TypeUniverse::default();
    let class = types.define_class("Point", None);
    let mut graph = Graph::new("hub");
    let array = graph.parameter(
        0,
        Stamp::Object(ObjectStamp::declared(TypeRef::array_of(TypeRef::Root))),
    );
    let element = graph.unique(NodeKind::LoadElementHub, &[array]);
    let expected = graph.parameter(1, Stamp::Object(ObjectStamp::unknown()));
    let hub = graph.unique(NodeKind::LoadHub, &[expected]);
    let same = graph.unique(
        NodeKind::Compare {
            op: CompareOp::Eq,
            kind: ValueKind::Object,
        },
        &[element, hub],
    );
    graph.append(
        NodeKind::FixedGuard {
            reason: DeoptReason::RuntimeConstraint,
            action: DeoptAction::None,
            negated: false,
        },
        &[same],
    );
    graph.append(NodeKind::Return, &[]);

    let mut heap = Heap::new();
    let points = heap.new_array(TypeRef::array_of(TypeRef::Instance(class)), 1).unwrap();
    let point = heap.alloc_instance(class);
    let outcome = run(&graph, &types, &mut heap, refs(&[points, point])).unwrap();
    assert_eq!(outcome, Outcome::Returned);
}
