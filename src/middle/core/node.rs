//! IR 节点种类
//!
//! 节点种类是一个封闭的标签联合，每种节点携带自己的载荷；
//! 规范化与降级通过穷尽匹配分派，而不是虚函数。
//!
//! 节点分两类：
//! - 浮动节点：纯计算，没有控制依赖，可以值编号（hash-cons）
//! - 固定节点：位于控制链上，按 `next` 顺序执行

use std::fmt;

use super::copy::{CopyNode, DelayedCopyNode};
use super::kind::{ElementKind, ValueKind};
use super::location::{LocationIdentity, MemoryEffects};
use super::types::Stamp;

/// 常量
///
/// 浮点值按位保存，使常量可以哈希并区分 `-0.0` 与 `0.0`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Null,
}

impl Constant {
    pub fn float(value: f32) -> Self {
        Constant::Float(value.to_bits())
    }

    pub fn double(value: f64) -> Self {
        Constant::Double(value.to_bits())
    }

    /// 逻辑常量（比较结果）
    pub fn logic(value: bool) -> Self {
        Constant::Int(value as i32)
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            Constant::Int(_) => ValueKind::Int,
            Constant::Long(_) => ValueKind::Long,
            Constant::Float(_) => ValueKind::Float,
            Constant::Double(_) => ValueKind::Double,
            Constant::Null => ValueKind::Object,
        }
    }

    /// 是否为该种类的零
    pub fn is_zero(&self) -> bool {
        match self {
            Constant::Int(v) => *v == 0,
            Constant::Long(v) => *v == 0,
            _ => false,
        }
    }

    /// 以 i64 视角读取整数常量
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Constant::Int(v) => Some(*v as i64),
            Constant::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{}i", v),
            Constant::Long(v) => write!(f, "{}L", v),
            Constant::Float(bits) => write!(f, "{}f", f32::from_bits(*bits)),
            Constant::Double(bits) => write!(f, "{}d", f64::from_bits(*bits)),
            Constant::Null => write!(f, "null"),
        }
    }
}

/// 二元算术/位运算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    UShr,
}

impl ArithOp {
    /// 是否满足交换律
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            ArithOp::Add | ArithOp::Mul | ArithOp::And | ArithOp::Or | ArithOp::Xor
        )
    }

    /// 是否为移位
    pub fn is_shift(self) -> bool {
        matches!(self, ArithOp::Shl | ArithOp::Shr | ArithOp::UShr)
    }
}

/// 一元运算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// 比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// 相等
    Eq,
    /// 有符号小于
    Lt,
    /// 无符号小于
    Below,
}

/// 去优化原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptReason {
    BoundsCheckException,
    RuntimeConstraint,
    NullCheckException,
}

/// 去优化后的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptAction {
    /// 保留编译代码
    None,
    /// 回到解释器重试并重新收集 profile，不禁止再次编译
    InvalidateReprofile,
    /// 作废并立即重编译
    InvalidateRecompile,
}

/// 运行时拷贝桩
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StubDescriptor {
    pub name: String,
    pub kind: ElementKind,
    pub aligned: bool,
    pub disjoint: bool,
    pub uninitialized: bool,
    pub killed: LocationIdentity,
}

/// 运行时（非桩）拷贝例程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeTarget {
    /// 完全检查的拷贝，失败时抛出客体异常
    CheckedArraycopy,
    /// 通用拷贝：自行校验，失败时回退到完全检查的行为
    GenericArraycopy,
}

/// 元素循环的遍历方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Traversal {
    /// 自低向高
    Forward,
    /// 自高向低
    Backward,
    /// 运行时判断：同一数组且源偏移小于目标偏移时自高向低
    Dynamic,
}

/// 节点种类
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    // ===== 固定节点 =====
    /// 图入口，同时是内存链的起点
    Start,
    Return,
    /// 异常处理入口
    ExceptionHandler,
    /// 条件守卫：`condition != negated` 时通过，否则去优化
    FixedGuard {
        reason: DeoptReason,
        action: DeoptAction,
        negated: bool,
    },
    /// 无条件去优化（终结节点）
    Deopt {
        reason: DeoptReason,
        action: DeoptAction,
    },
    /// 高层数组拷贝，输入为五个操作数
    ArrayCopy(CopyNode),
    /// 等待阶段的数组拷贝
    DelayedCopy(DelayedCopyNode),
    /// 调用拷贝桩
    StubCall { stub: StubDescriptor, bci: i32 },
    /// 显式元素循环
    CopyLoop {
        kind: ElementKind,
        traversal: Traversal,
        location: LocationIdentity,
    },
    /// 逐元素存储检查拷贝，第六个输入为目标元素 hub
    CheckcastCopy { location: LocationIdentity, bci: i32 },
    /// 调用运行时拷贝例程
    RuntimeCall {
        target: RuntimeTarget,
        kind: ElementKind,
        bci: i32,
    },

    // ===== 浮动节点 =====
    Parameter { index: u32, stamp: Stamp },
    Constant(Constant),
    Binary { op: ArithOp, kind: ValueKind },
    Unary { op: UnaryOp, kind: ValueKind },
    Compare { op: CompareOp, kind: ValueKind },
    ArrayLength,
    IsNull,
    LoadHub,
    /// 从对象的 hub 读取 layout helper
    LoadLayoutHelper,
    /// 数组类的元素 hub
    LoadElementHub,
    /// 帧状态：去优化后恢复执行的位置
    FrameState { bci: i32 },
}

impl NodeKind {
    /// 是否位于控制链上
    pub fn is_fixed(&self) -> bool {
        matches!(
            self,
            NodeKind::Start
                | NodeKind::Return
                | NodeKind::ExceptionHandler
                | NodeKind::FixedGuard { .. }
                | NodeKind::Deopt { .. }
                | NodeKind::ArrayCopy(_)
                | NodeKind::DelayedCopy(_)
                | NodeKind::StubCall { .. }
                | NodeKind::CopyLoop { .. }
                | NodeKind::CheckcastCopy { .. }
                | NodeKind::RuntimeCall { .. }
        )
    }

    /// 是否终结控制链
    pub fn is_control_sink(&self) -> bool {
        matches!(self, NodeKind::Return | NodeKind::Deopt { .. })
    }

    /// 是否可以值编号
    pub fn is_value_numberable(&self) -> bool {
        matches!(
            self,
            NodeKind::Constant(_)
                | NodeKind::Binary { .. }
                | NodeKind::Unary { .. }
                | NodeKind::Compare { .. }
                | NodeKind::ArrayLength
                | NodeKind::IsNull
                | NodeKind::LoadHub
                | NodeKind::LoadLayoutHelper
                | NodeKind::LoadElementHub
        )
    }

    /// 需要的输入个数（None 表示可变）
    pub fn input_count(&self) -> Option<usize> {
        match self {
            NodeKind::ArrayCopy(_)
            | NodeKind::DelayedCopy(_)
            | NodeKind::StubCall { .. }
            | NodeKind::CopyLoop { .. }
            | NodeKind::RuntimeCall { .. } => Some(5),
            NodeKind::CheckcastCopy { .. } => Some(6),
            NodeKind::Binary { .. } | NodeKind::Compare { .. } => Some(2),
            NodeKind::Unary { .. }
            | NodeKind::ArrayLength
            | NodeKind::IsNull
            | NodeKind::LoadHub
            | NodeKind::LoadLayoutHelper
            | NodeKind::LoadElementHub
            | NodeKind::FixedGuard { .. } => Some(1),
            NodeKind::FrameState { .. } => None,
            _ => Some(0),
        }
    }

    /// 节点的内存效果
    pub fn memory_effects(&self) -> MemoryEffects {
        match self {
            NodeKind::Start => MemoryEffects {
                read: None,
                kill: Some(LocationIdentity::Any),
            },
            NodeKind::ArrayCopy(copy) => copy.memory_effects(),
            NodeKind::DelayedCopy(delayed) => MemoryEffects::read_kill(
                delayed.copy().read_identity(),
                delayed.location(),
            ),
            NodeKind::StubCall { stub, .. } => {
                MemoryEffects::read_kill(LocationIdentity::array(stub.kind), stub.killed)
            }
            NodeKind::CopyLoop { kind, location, .. } => {
                MemoryEffects::read_kill(LocationIdentity::array(*kind), *location)
            }
            NodeKind::CheckcastCopy { location, .. } => {
                MemoryEffects::read_kill(LocationIdentity::array(ElementKind::Object), *location)
            }
            NodeKind::RuntimeCall { .. } => {
                MemoryEffects::read_kill(LocationIdentity::Any, LocationIdentity::Any)
            }
            NodeKind::ArrayLength => MemoryEffects::reads(LocationIdentity::ArrayLength),
            NodeKind::LoadHub | NodeKind::LoadLayoutHelper | NodeKind::LoadElementHub => {
                MemoryEffects::reads(LocationIdentity::Hub)
            }
            _ => MemoryEffects::none(),
        }
    }

    /// 是否写内存（参与内存链）
    pub fn is_memory_kill(&self) -> bool {
        self.is_fixed() && self.memory_effects().kill.is_some()
    }

    /// 残留调用携带的字节码位置
    ///
    /// 从这些节点内部发生的去优化或异常必须像原始高层操作仍在执行一样恢复。
    pub fn residual_call_bci(&self) -> Option<i32> {
        match self {
            NodeKind::StubCall { bci, .. }
            | NodeKind::CheckcastCopy { bci, .. }
            | NodeKind::RuntimeCall { bci, .. } => Some(*bci),
            _ => None,
        }
    }

    /// 是否可能抛出客体异常
    pub fn may_throw(&self) -> bool {
        match self {
            NodeKind::ArrayCopy(_) | NodeKind::RuntimeCall { .. } | NodeKind::CheckcastCopy { .. } => {
                true
            }
            NodeKind::DelayedCopy(delayed) => delayed.may_throw(),
            _ => false,
        }
    }

    /// 常量载荷
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            NodeKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// 拷贝载荷（高层或延迟）
    pub fn as_copy(&self) -> Option<&CopyNode> {
        match self {
            NodeKind::ArrayCopy(copy) => Some(copy),
            NodeKind::DelayedCopy(delayed) => Some(delayed.copy()),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            NodeKind::Start => write!(f, "Start"),
            NodeKind::Return => write!(f, "Return"),
            NodeKind::ExceptionHandler => write!(f, "ExceptionHandler"),
            NodeKind::FixedGuard { reason, negated, .. } => {
                write!(f, "FixedGuard({:?}{})", reason, if *negated { ", negated" } else { "" })
            }
            NodeKind::Deopt { reason, action } => write!(f, "Deopt({:?}, {:?})", reason, action),
            NodeKind::ArrayCopy(copy) => write!(f, "{}", copy),
            NodeKind::DelayedCopy(delayed) => write!(f, "{}", delayed),
            NodeKind::StubCall { stub, .. } => write!(f, "StubCall({})", stub.name),
            NodeKind::CopyLoop { kind, traversal, .. } => {
                write!(f, "CopyLoop[{}]({:?})", kind, traversal)
            }
            NodeKind::CheckcastCopy { .. } => write!(f, "CheckcastCopy"),
            NodeKind::RuntimeCall { target, .. } => write!(f, "RuntimeCall({:?})", target),
            NodeKind::Parameter { index, .. } => write!(f, "Param({})", index),
            NodeKind::Constant(c) => write!(f, "Const({})", c),
            NodeKind::Binary { op, .. } => write!(f, "{:?}", op),
            NodeKind::Unary { op, .. } => write!(f, "{:?}", op),
            NodeKind::Compare { op, .. } => write!(f, "Compare{:?}", op),
            NodeKind::ArrayLength => write!(f, "ArrayLength"),
            NodeKind::IsNull => write!(f, "IsNull"),
            NodeKind::LoadHub => write!(f, "LoadHub"),
            NodeKind::LoadLayoutHelper => write!(f, "LoadLayoutHelper"),
            NodeKind::LoadElementHub => write!(f, "LoadElementHub"),
            NodeKind::FrameState { bci } => write!(f, "FrameState@{}", bci),
        }
    }
}
