//! 集成测试的公共构造
//!
//! 拷贝图的五个操作数都是参数：src 0、dest 1、srcPos 2、destPos 3、length 4。

#![allow(dead_code)]

use strata::middle::passes::lowering::lower_through;
use strata::middle::{
    CopyNode, ElementKind, Graph, GuardsStage, LoweringContext, LoweringReport, NodeId, NodeKind,
    ObjectStamp, Stamp, TypeRef, TypeUniverse,
};
use strata::vm::{run, Heap, ObjectRef, Outcome, Value};

pub const COPY_BCI: i32 = 11;

/// 拷贝图的形状
#[derive(Debug, Clone)]
pub struct Shape {
    pub kind: ElementKind,
    pub src: ObjectStamp,
    pub dest: ObjectStamp,
    pub exact: bool,
    pub same_array: bool,
    pub handler: bool,
}

impl Shape {
    /// 两个非空的 `kind[]`
    pub fn arrays(kind: ElementKind) -> Self {
        let ty = if kind.is_reference() {
            TypeRef::array_of(TypeRef::Root)
        } else {
            TypeRef::PrimitiveArray(kind)
        };
        Self {
            kind,
            src: ObjectStamp::declared(ty.clone()).non_null(),
            dest: ObjectStamp::declared(ty).non_null(),
            exact: false,
            same_array: false,
            handler: false,
        }
    }

    pub fn src(
        mut self,
        stamp: ObjectStamp,
    ) -> Self {
        self.src = stamp;
        self
    }

    pub fn dest(
        mut self,
        stamp: ObjectStamp,
    ) -> Self {
        self.dest = stamp;
        self
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn same_array(mut self) -> Self {
        self.same_array = true;
        self
    }

    pub fn with_handler(mut self) -> Self {
        self.handler = true;
        self
    }

    /// 构造图，返回图与拷贝节点
    pub fn build(&self) -> (Graph, NodeId) {
        let mut graph = Graph::new("arraycopy");
        let src = graph.parameter(0, Stamp::Object(self.src.clone()));
        let dest = if self.same_array {
            src
        } else {
            graph.parameter(1, Stamp::Object(self.dest.clone()))
        };
        let src_pos = graph.parameter(2, Stamp::Int);
        let dest_pos = graph.parameter(3, Stamp::Int);
        let length = graph.parameter(4, Stamp::Int);
        let state = graph.frame_state(COPY_BCI);
        let node = CopyNode::new(self.kind, COPY_BCI).with_exact(self.exact);
        let copy = graph.append(NodeKind::ArrayCopy(node), &[src, src_pos, dest, dest_pos, length]);
        graph.set_state_after(copy, Some(state));
        if self.handler {
            let handler = graph.add_exception_handler(copy);
            graph.add_fixed_after(handler, NodeKind::Return, &[]);
        }
        graph.append(NodeKind::Return, &[]);
        (graph, copy)
    }
}

/// 拷贝图的实参
pub fn copy_args(
    src: ObjectRef,
    dest: ObjectRef,
    src_pos: i32,
    dest_pos: i32,
    length: i32,
) -> Vec<Value> {
    vec![
        Value::Ref(Some(src)),
        Value::Ref(Some(dest)),
        Value::Int(src_pos),
        Value::Int(dest_pos),
        Value::Int(length),
    ]
}

/// 降级到最后一个阶段
pub fn lower_fully(
    ctx: &LoweringContext,
    graph: &Graph,
) -> (Graph, LoweringReport) {
    let mut lowered = graph.clone();
    let report = lower_through(ctx, &mut lowered, GuardsStage::AfterFsa).unwrap();
    lowered.verify().unwrap();
    (lowered, report)
}

/// 在堆的副本上执行，返回结果与执行后的堆
pub fn execute(
    graph: &Graph,
    types: &TypeUniverse,
    heap: &Heap,
    args: Vec<Value>,
) -> (Outcome, Heap) {
    let mut heap = heap.clone();
    let outcome = run(graph, types, &mut heap, args).unwrap();
    (outcome, heap)
}

/// 控制链上是否还有高层拷贝
pub fn has_high_level_copy(graph: &Graph) -> bool {
    graph
        .fixed_chain()
        .into_iter()
        .any(|id| matches!(graph[id].kind(), NodeKind::ArrayCopy(_) | NodeKind::DelayedCopy(_)))
}
