//! 统一测试套件
//!
//! 规范化与降级的测试，以及构造拷贝图的公共夹具。


use crate::middle::core::copy::CopyNode;
use crate::middle::core::graph::{Graph, NodeId};
use crate::middle::core::kind::ElementKind;
use crate::middle::core::node::NodeKind;
use crate::middle::core::types::{ObjectStamp, Stamp, TypeRef};

/// 夹具中拷贝节点的字节码位置
pub const COPY_BCI: i32 = 7;

/// 元素种类对应的数组类型
pub fn array_type(kind: ElementKind) -> TypeRef {
    if kind.is_reference() {
        TypeRef::array_of(TypeRef::Root)
    } else {
        TypeRef::PrimitiveArray(kind)
    }
}

/// 非空且类型精确的数组
pub fn exact_array(kind: ElementKind) -> ObjectStamp {
    ObjectStamp::exact(array_type(kind)).non_null()
}

/// 构造好的拷贝图
pub struct CopyFixture {
    pub graph: Graph,
    pub src: NodeId,
    pub dest: NodeId,
    pub src_pos: NodeId,
    pub dest_pos: NodeId,
    pub length: NodeId,
    pub copy: NodeId,
    pub state: NodeId,
    pub handler: Option<NodeId>,
}

/// 拷贝图构造器
pub struct CopyBuilder {
    kind: ElementKind,
    src: ObjectStamp,
    dest: ObjectStamp,
    same_array: bool,
    src_pos: Option<i32>,
    dest_pos: Option<i32>,
    length: Option<i32>,
    exact: bool,
    handler: bool,
}

impl CopyBuilder {
    /// 默认：两个不同的精确非空数组，偏移与长度都是参数
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            src: exact_array(kind),
            dest: exact_array(kind),
            same_array: false,
            src_pos: None,
            dest_pos: None,
            length: None,
            exact: false,
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

    pub fn same_array(mut self) -> Self {
        self.same_array = true;
        self
    }

    pub fn offsets(
        mut self,
        src_pos: i32,
        dest_pos: i32,
    ) -> Self {
        self.src_pos = Some(src_pos);
        self.dest_pos = Some(dest_pos);
        self
    }

    pub fn length(
        mut self,
        length: i32,
    ) -> Self {
        self.length = Some(length);
        self
    }

    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    pub fn with_handler(mut self) -> Self {
        self.handler = true;
        self
    }

    pub fn build(self) -> CopyFixture {
        let mut graph = Graph::new("copy");
        let src = graph.parameter(0, Stamp::Object(self.src));
        let dest = if self.same_array {
            src
        } else {
            graph.parameter(1, Stamp::Object(self.dest))
        };
        let mut next_param = 2;
        let mut int_operand = |graph: &mut Graph, value: Option<i32>| match value {
            Some(v) => graph.int(v),
            None => {
                next_param += 1;
                graph.parameter(next_param - 1, Stamp::Int)
            }
        };
        let src_pos = int_operand(&mut graph, self.src_pos);
        let dest_pos = int_operand(&mut graph, self.dest_pos);
        let length = int_operand(&mut graph, self.length);

        let state = graph.frame_state(COPY_BCI);
        let node = CopyNode::new(self.kind, COPY_BCI).with_exact(self.exact);
        let copy = graph.append(NodeKind::ArrayCopy(node), &[src, src_pos, dest, dest_pos, length]);
        graph.set_state_after(copy, Some(state));
        let handler = if self.handler {
            let handler = graph.add_exception_handler(copy);
            graph.add_fixed_after(handler, NodeKind::Return, &[]);
            Some(handler)
        } else {
            None
        };
        graph.append(NodeKind::Return, &[]);

        CopyFixture {
            graph,
            src,
            dest,
            src_pos,
            dest_pos,
            length,
            copy,
            state,
            handler,
        }
    }
}

/// 主控制链上的节点种类
pub fn chain_kinds(graph: &Graph) -> Vec<NodeKind> {
    graph
        .fixed_chain()
        .into_iter()
        .map(|id| graph[id].kind().clone())
        .collect()
}

/// 主控制链上第一个满足条件的节点
pub fn find_fixed(
    graph: &Graph,
    pred: impl Fn(&NodeKind) -> bool,
) -> Option<NodeId> {
    graph.fixed_chain().into_iter().find(|id| pred(graph[*id].kind()))
}
