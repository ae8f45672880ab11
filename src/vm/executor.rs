//! 参考执行器
//!
//! 沿控制链逐个执行固定节点，浮动节点按需求值并缓存。
//! 高层拷贝节点（以及运行时拷贝例程）按客体语言的完全检查语义执行，
//! 桩调用与元素循环不做任何检查：它们的前置条件必须已经由守卫保证，
//! 违反时报告 [`VMError`] 而不是客体异常。
//!
//! 同一张图在降级前后各执行一次，结果应当一致。

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace};

use crate::middle::core::copy::{DEST, DEST_POS, LENGTH, SRC, SRC_POS};
use crate::middle::core::graph::{Graph, NodeId};
use crate::middle::core::kind::{ElementKind, ValueKind};
use crate::middle::core::node::{CompareOp, Constant, DeoptAction, DeoptReason, NodeKind, Traversal};
use crate::middle::core::types::{Component, TypeRef, TypeUniverse};
use crate::middle::passes::canonical::{fold_binary, fold_compare, fold_unary};
use crate::vm::errors::{VMError, VMResult};
use crate::vm::heap::{Heap, ObjectRef, Value};

/// 客体异常
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuestException {
    NullPointer,
    ArrayIndexOutOfBounds,
    ArrayStore,
}

impl fmt::Display for GuestException {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            GuestException::NullPointer => "NullPointerException",
            GuestException::ArrayIndexOutOfBounds => "ArrayIndexOutOfBoundsException",
            GuestException::ArrayStore => "ArrayStoreException",
        };
        write!(f, "{}", name)
    }
}

/// 执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Returned,
    /// 离开编译代码，从 `bci` 处回到解释器
    Deoptimized {
        reason: DeoptReason,
        action: DeoptAction,
        bci: Option<i32>,
    },
    /// 客体异常未被处理（或经处理入口后返回）
    Exception(GuestException),
}

/// 固定节点执行后的去向
enum Step {
    Next,
    Return,
    Deopt(DeoptReason, DeoptAction),
    Throw(GuestException),
}

/// 一次拷贝的操作数
#[derive(Debug, Clone, Copy)]
struct CopyArgs {
    src: Option<ObjectRef>,
    src_pos: i32,
    dest: Option<ObjectRef>,
    dest_pos: i32,
    length: i32,
}

/// 参考执行器
pub struct Executor<'g> {
    graph: &'g Graph,
    types: &'g TypeUniverse,
    args: Vec<Value>,
    values: HashMap<NodeId, Value>,
    steps: usize,
}

impl<'g> Executor<'g> {
    pub fn new(
        graph: &'g Graph,
        types: &'g TypeUniverse,
        args: Vec<Value>,
    ) -> Self {
        Self {
            graph,
            types,
            args,
            values: HashMap::new(),
            steps: 0,
        }
    }

    /// 已执行的固定节点个数
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// 从 Start 开始执行
    pub fn run(
        &mut self,
        heap: &mut Heap,
    ) -> VMResult<Outcome> {
        let mut current = self.graph[self.graph.start()].next();
        let mut pending = None;
        while let Some(id) = current {
            self.steps += 1;
            trace!(graph = %self.graph.name(), node = %id, kind = %self.graph[id].kind(), "execute");
            match self.step(heap, id)? {
                Step::Next => current = self.graph[id].next(),
                Step::Return => break,
                Step::Deopt(reason, action) => {
                    let bci = self.state_bci(id);
                    debug!(graph = %self.graph.name(), node = %id, ?reason, ?bci, "deoptimized");
                    return Ok(Outcome::Deoptimized { reason, action, bci });
                }
                Step::Throw(exception) => {
                    debug!(graph = %self.graph.name(), node = %id, %exception, "guest exception");
                    match self.graph[id].exception_edge() {
                        Some(handler) => {
                            pending = Some(exception);
                            current = Some(handler);
                        }
                        None => return Ok(Outcome::Exception(exception)),
                    }
                }
            }
        }
        Ok(match pending {
            Some(exception) => Outcome::Exception(exception),
            None => Outcome::Returned,
        })
    }

    fn state_bci(
        &self,
        id: NodeId,
    ) -> Option<i32> {
        match self.graph[self.graph[id].state_after()?].kind() {
            NodeKind::FrameState { bci } => Some(*bci),
            _ => None,
        }
    }

    fn step(
        &mut self,
        heap: &mut Heap,
        id: NodeId,
    ) -> VMResult<Step> {
        let graph = self.graph;
        match graph[id].kind() {
            NodeKind::Start | NodeKind::ExceptionHandler => Ok(Step::Next),
            NodeKind::Return => Ok(Step::Return),
            NodeKind::FixedGuard {
                reason,
                action,
                negated,
            } => {
                let condition = self.eval(heap, graph[id].input(0))?.as_int()? != 0;
                if condition != *negated {
                    Ok(Step::Next)
                } else {
                    Ok(Step::Deopt(*reason, *action))
                }
            }
            NodeKind::Deopt { reason, action } => Ok(Step::Deopt(*reason, *action)),
            NodeKind::ArrayCopy(_) | NodeKind::DelayedCopy(_) | NodeKind::RuntimeCall { .. } => {
                let args = self.copy_args(heap, id)?;
                Ok(match checked_copy(self.types, heap, args)? {
                    Some(exception) => Step::Throw(exception),
                    None => Step::Next,
                })
            }
            NodeKind::StubCall { stub, .. } => {
                let args = self.copy_args(heap, id)?;
                let (src, dest) = self.unchecked_operands(heap, id, args, stub.kind)?;
                if stub.disjoint {
                    element_loop(heap, src, dest, args, false)?;
                } else {
                    buffered_copy(heap, src, dest, args)?;
                }
                Ok(Step::Next)
            }
            NodeKind::CopyLoop { kind, traversal, .. } => {
                let args = self.copy_args(heap, id)?;
                let (src, dest) = self.unchecked_operands(heap, id, args, *kind)?;
                let backward = match traversal {
                    Traversal::Forward => false,
                    Traversal::Backward => true,
                    Traversal::Dynamic => src == dest && args.src_pos < args.dest_pos,
                };
                element_loop(heap, src, dest, args, backward)?;
                Ok(Step::Next)
            }
            NodeKind::CheckcastCopy { .. } => {
                let args = self.copy_args(heap, id)?;
                let (src, dest) = self.unchecked_operands(heap, id, args, ElementKind::Object)?;
                let element = match self.eval(heap, graph[id].input(5))? {
                    Value::Hub(ty) => ty,
                    other => return Err(VMError::TypeError(format!("expected hub, found {}", other))),
                };
                Ok(match store_checked_copy(self.types, heap, src, dest, args, &element)? {
                    Some(exception) => Step::Throw(exception),
                    None => Step::Next,
                })
            }
            _ => Err(VMError::Unsupported(id)),
        }
    }

    fn copy_args(
        &mut self,
        heap: &Heap,
        id: NodeId,
    ) -> VMResult<CopyArgs> {
        let node = &self.graph[id];
        let (src, src_pos, dest, dest_pos, length) = (
            node.input(SRC),
            node.input(SRC_POS),
            node.input(DEST),
            node.input(DEST_POS),
            node.input(LENGTH),
        );
        Ok(CopyArgs {
            src: self.eval(heap, src)?.as_object()?,
            src_pos: self.eval(heap, src_pos)?.as_int()?,
            dest: self.eval(heap, dest)?.as_object()?,
            dest_pos: self.eval(heap, dest_pos)?.as_int()?,
            length: self.eval(heap, length)?.as_int()?,
        })
    }

    /// 桩与循环的前置条件：非空、元素种类一致、范围合法
    fn unchecked_operands(
        &self,
        heap: &Heap,
        id: NodeId,
        args: CopyArgs,
        kind: ElementKind,
    ) -> VMResult<(ObjectRef, ObjectRef)> {
        let (src, dest) = match (args.src, args.dest) {
            (Some(src), Some(dest)) => (src, dest),
            _ => return Err(VMError::NullDereference(id)),
        };
        for array in [src, dest] {
            if heap.type_of(array)?.component_kind() != Some(kind) {
                return Err(VMError::UncheckedTypeMismatch(id));
            }
        }
        let (src_length, dest_length) = (heap.array_length(src)?, heap.array_length(dest)?);
        if !in_bounds(args, src_length, dest_length) {
            return Err(VMError::UncheckedOutOfBounds {
                node: id,
                src_pos: args.src_pos,
                dest_pos: args.dest_pos,
                length: args.length,
                src_length,
                dest_length,
            });
        }
        Ok((src, dest))
    }

    /// 求值浮动节点
    fn eval(
        &mut self,
        heap: &Heap,
        id: NodeId,
    ) -> VMResult<Value> {
        if let Some(value) = self.values.get(&id) {
            return Ok(value.clone());
        }
        let value = self.compute(heap, id)?;
        self.values.insert(id, value.clone());
        Ok(value)
    }

    fn compute(
        &mut self,
        heap: &Heap,
        id: NodeId,
    ) -> VMResult<Value> {
        let graph = self.graph;
        let node = &graph[id];
        match node.kind() {
            NodeKind::Parameter { index, .. } => self
                .args
                .get(*index as usize)
                .cloned()
                .ok_or(VMError::MissingArgument(*index)),
            NodeKind::Constant(c) => Ok(from_constant(*c)),
            NodeKind::Binary { op, .. } => {
                let x = to_constant(&self.eval(heap, node.input(0))?)?;
                let y = to_constant(&self.eval(heap, node.input(1))?)?;
                match fold_binary(*op, x, y) {
                    Some(c) => Ok(from_constant(c)),
                    None if y.is_zero() => Err(VMError::DivisionByZero(id)),
                    None => Err(VMError::TypeError(format!("cannot apply {:?} to {} and {}", op, x, y))),
                }
            }
            NodeKind::Unary { op, .. } => {
                let x = to_constant(&self.eval(heap, node.input(0))?)?;
                fold_unary(*op, x)
                    .map(from_constant)
                    .ok_or_else(|| VMError::TypeError(format!("cannot apply {:?} to {}", op, x)))
            }
            NodeKind::Compare { op, kind } => {
                let x = self.eval(heap, node.input(0))?;
                let y = self.eval(heap, node.input(1))?;
                Ok(Value::Int(compare(*op, *kind, &x, &y)? as i32))
            }
            NodeKind::IsNull => {
                let object = self.eval(heap, node.input(0))?.as_object()?;
                Ok(Value::Int(object.is_none() as i32))
            }
            NodeKind::ArrayLength => {
                let array = self.object(heap, id)?;
                Ok(Value::Int(heap.array_length(array)? as i32))
            }
            NodeKind::LoadHub => {
                let object = self.object(heap, id)?;
                Ok(Value::Hub(heap.type_of(object)?))
            }
            NodeKind::LoadLayoutHelper => {
                let object = self.object(heap, id)?;
                Ok(Value::Int(self.types.layout_helper(&heap.type_of(object)?)))
            }
            NodeKind::LoadElementHub => {
                let array = self.object(heap, id)?;
                match heap.type_of(array)? {
                    TypeRef::ObjectArray(element) => Ok(Value::Hub(*element)),
                    other => Err(VMError::TypeError(format!("{} has no element hub", other))),
                }
            }
            _ => Err(VMError::Unsupported(id)),
        }
    }

    /// 求值单个对象输入，空值视为图错误
    fn object(
        &mut self,
        heap: &Heap,
        id: NodeId,
    ) -> VMResult<ObjectRef> {
        let input = self.graph[id].input(0);
        self.eval(heap, input)?
            .as_object()?
            .ok_or(VMError::NullDereference(id))
    }
}

/// 以 `args` 为参数执行 `graph`
pub fn run(
    graph: &Graph,
    types: &TypeUniverse,
    heap: &mut Heap,
    args: Vec<Value>,
) -> VMResult<Outcome> {
    Executor::new(graph, types, args).run(heap)
}

fn to_constant(value: &Value) -> VMResult<Constant> {
    match value {
        Value::Int(v) => Ok(Constant::Int(*v)),
        Value::Long(v) => Ok(Constant::Long(*v)),
        Value::Float(v) => Ok(Constant::float(*v)),
        Value::Double(v) => Ok(Constant::double(*v)),
        Value::Ref(None) => Ok(Constant::Null),
        other => Err(VMError::TypeError(format!("{} is not a primitive value", other))),
    }
}

fn from_constant(constant: Constant) -> Value {
    match constant {
        Constant::Int(v) => Value::Int(v),
        Constant::Long(v) => Value::Long(v),
        Constant::Float(bits) => Value::Float(f32::from_bits(bits)),
        Constant::Double(bits) => Value::Double(f64::from_bits(bits)),
        Constant::Null => Value::NULL,
    }
}

fn compare(
    op: CompareOp,
    kind: ValueKind,
    x: &Value,
    y: &Value,
) -> VMResult<bool> {
    let mismatch = || VMError::TypeError(format!("cannot compare {} with {} as {:?}", x, y, kind));
    match (kind, x, y) {
        (ValueKind::Object, Value::Ref(a), Value::Ref(b)) if op == CompareOp::Eq => Ok(a == b),
        (ValueKind::Object, Value::Hub(a), Value::Hub(b)) if op == CompareOp::Eq => Ok(a == b),
        (ValueKind::Float, Value::Float(a), Value::Float(b)) => match op {
            CompareOp::Eq => Ok(a == b),
            CompareOp::Lt => Ok(a < b),
            CompareOp::Below => Err(mismatch()),
        },
        (ValueKind::Double, Value::Double(a), Value::Double(b)) => match op {
            CompareOp::Eq => Ok(a == b),
            CompareOp::Lt => Ok(a < b),
            CompareOp::Below => Err(mismatch()),
        },
        (ValueKind::Int | ValueKind::Long, _, _) => {
            fold_compare(op, to_constant(x)?, to_constant(y)?).ok_or_else(mismatch)
        }
        _ => Err(mismatch()),
    }
}

fn in_bounds(
    args: CopyArgs,
    src_length: usize,
    dest_length: usize,
) -> bool {
    let (src_pos, dest_pos, length) = (args.src_pos as i64, args.dest_pos as i64, args.length as i64);
    src_pos >= 0
        && dest_pos >= 0
        && length >= 0
        && src_pos + length <= src_length as i64
        && dest_pos + length <= dest_length as i64
}

/// 先整体读出再写入，等价于经临时缓冲区拷贝
fn buffered_copy(
    heap: &mut Heap,
    src: ObjectRef,
    dest: ObjectRef,
    args: CopyArgs,
) -> VMResult<()> {
    let (from, to, length) = (args.src_pos as usize, args.dest_pos as usize, args.length as usize);
    let buffer = heap.elements(src)?[from..from + length].to_vec();
    heap.elements_mut(dest)?[to..to + length].clone_from_slice(&buffer);
    Ok(())
}

/// 逐元素拷贝；源与目标重叠时结果取决于方向
fn element_loop(
    heap: &mut Heap,
    src: ObjectRef,
    dest: ObjectRef,
    args: CopyArgs,
    backward: bool,
) -> VMResult<()> {
    let (from, to) = (args.src_pos as usize, args.dest_pos as usize);
    let indices: Box<dyn Iterator<Item = usize>> = if backward {
        Box::new((0..args.length as usize).rev())
    } else {
        Box::new(0..args.length as usize)
    };
    for i in indices {
        let value = heap.elements(src)?[from + i].clone();
        heap.elements_mut(dest)?[to + i] = value;
    }
    Ok(())
}

/// 逐元素检查存储类型；遇到不可存入的元素时保留已拷贝的前缀并报告 ArrayStore
fn store_checked_copy(
    types: &TypeUniverse,
    heap: &mut Heap,
    src: ObjectRef,
    dest: ObjectRef,
    args: CopyArgs,
    element: &TypeRef,
) -> VMResult<Option<GuestException>> {
    let (from, to, length) = (args.src_pos as usize, args.dest_pos as usize, args.length as usize);
    let buffer = heap.elements(src)?[from..from + length].to_vec();
    for (i, value) in buffer.into_iter().enumerate() {
        if let Some(object) = value.as_object()? {
            if !types.is_assignable(&heap.type_of(object)?, element) {
                return Ok(Some(GuestException::ArrayStore));
            }
        }
        heap.elements_mut(dest)?[to + i] = value;
    }
    Ok(None)
}

/// 完全检查的拷贝：空检查、数组类型、范围、逐元素存储检查，依次进行
fn checked_copy(
    types: &TypeUniverse,
    heap: &mut Heap,
    args: CopyArgs,
) -> VMResult<Option<GuestException>> {
    let (src, dest) = match (args.src, args.dest) {
        (Some(src), Some(dest)) => (src, dest),
        _ => return Ok(Some(GuestException::NullPointer)),
    };
    let (src_type, dest_type) = (heap.type_of(src)?, heap.type_of(dest)?);
    let element = match (src_type.component(), dest_type.component()) {
        (Some(Component::Primitive(a)), Some(Component::Primitive(b))) if a == b => None,
        (Some(Component::Reference(_)), Some(Component::Reference(element))) => {
            Some(element.clone())
        }
        _ => return Ok(Some(GuestException::ArrayStore)),
    };
    if !in_bounds(args, heap.array_length(src)?, heap.array_length(dest)?) {
        return Ok(Some(GuestException::ArrayIndexOutOfBounds));
    }
    match element {
        Some(element) if !types.is_assignable(&src_type, &dest_type) => {
            store_checked_copy(types, heap, src, dest, args, &element)
        }
        _ => buffered_copy(heap, src, dest, args).map(|_| None),
    }
}
