//! 算术、比较与空检查节点的规范化规则
//!
//! 整数运算按补码回绕，移位量按操作数位宽取模。浮点只做常量折叠
//! 与乘除 1：其他代数恒等式在 NaN 与 `-0.0` 下不再逐位成立。

use crate::middle::core::graph::{Graph, Inputs, NodeId};
use crate::middle::core::kind::ValueKind;
use crate::middle::core::node::{ArithOp, CompareOp, Constant, NodeKind, UnaryOp};

use super::Canonical;

/// 该种类的整数常量
fn int_of(
    kind: ValueKind,
    value: i64,
) -> Option<Constant> {
    match kind {
        ValueKind::Int => Some(Constant::Int(value as i32)),
        ValueKind::Long => Some(Constant::Long(value)),
        _ => None,
    }
}

fn constant(value: Constant) -> Canonical {
    Canonical::Rebuild(NodeKind::Constant(value), Inputs::new())
}

fn swapped(
    kind: NodeKind,
    a: NodeId,
    b: NodeId,
) -> Canonical {
    let mut inputs = Inputs::new();
    inputs.push(b);
    inputs.push(a);
    Canonical::Rebuild(kind, inputs)
}

/// 交换律运算的规范顺序：常量在右，否则较小的句柄在左
fn needs_swap(
    graph: &Graph,
    a: NodeId,
    b: NodeId,
) -> bool {
    match (graph.constant_of(a), graph.constant_of(b)) {
        (Some(_), None) => true,
        (None, None) => a > b,
        _ => false,
    }
}

/// 折叠两个常量上的二元运算
pub fn fold_binary(
    op: ArithOp,
    x: Constant,
    y: Constant,
) -> Option<Constant> {
    match (x, y) {
        (Constant::Int(a), Constant::Int(b)) => {
            let shift = (b & 31) as u32;
            let value = match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div if b == 0 => return None,
                ArithOp::Div => a.wrapping_div(b),
                ArithOp::And => a & b,
                ArithOp::Or => a | b,
                ArithOp::Xor => a ^ b,
                ArithOp::Shl => a.wrapping_shl(shift),
                ArithOp::Shr => a >> shift,
                ArithOp::UShr => ((a as u32) >> shift) as i32,
            };
            Some(Constant::Int(value))
        }
        (Constant::Long(a), y) if op.is_shift() => {
            let shift = (y.as_i64()? & 63) as u32;
            let value = match op {
                ArithOp::Shl => a.wrapping_shl(shift),
                ArithOp::Shr => a >> shift,
                _ => ((a as u64) >> shift) as i64,
            };
            Some(Constant::Long(value))
        }
        (Constant::Long(a), Constant::Long(b)) => {
            let value = match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div if b == 0 => return None,
                ArithOp::Div => a.wrapping_div(b),
                ArithOp::And => a & b,
                ArithOp::Or => a | b,
                ArithOp::Xor => a ^ b,
                _ => return None,
            };
            Some(Constant::Long(value))
        }
        (Constant::Float(a), Constant::Float(b)) => {
            let (a, b) = (f32::from_bits(a), f32::from_bits(b));
            let value = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                _ => return None,
            };
            Some(Constant::float(value))
        }
        (Constant::Double(a), Constant::Double(b)) => {
            let (a, b) = (f64::from_bits(a), f64::from_bits(b));
            let value = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                _ => return None,
            };
            Some(Constant::double(value))
        }
        _ => None,
    }
}

fn is_float_one(value: Constant) -> bool {
    match value {
        Constant::Float(bits) => f32::from_bits(bits) == 1.0,
        Constant::Double(bits) => f64::from_bits(bits) == 1.0,
        _ => false,
    }
}

pub fn binary(
    graph: &Graph,
    id: NodeId,
    op: ArithOp,
    kind: ValueKind,
) -> Canonical {
    let node = &graph[id];
    let (a, b) = (node.input(0), node.input(1));
    let (ca, cb) = (graph.constant_of(a), graph.constant_of(b));

    if let (Some(x), Some(y)) = (ca, cb) {
        return match fold_binary(op, x, y) {
            Some(value) => constant(value),
            None => Canonical::Unchanged,
        };
    }

    if kind.is_float() {
        return match op {
            ArithOp::Mul if cb.is_some_and(is_float_one) => Canonical::Replace(a),
            ArithOp::Mul if ca.is_some_and(is_float_one) => Canonical::Replace(b),
            ArithOp::Div if cb.is_some_and(is_float_one) => Canonical::Replace(a),
            _ => Canonical::Unchanged,
        };
    }
    if kind.int_bits().is_none() {
        return Canonical::Unchanged;
    }

    if op.is_commutative() && needs_swap(graph, a, b) {
        return swapped(NodeKind::Binary { op, kind }, a, b);
    }

    if a == b {
        match op {
            ArithOp::Sub | ArithOp::Xor => {
                if let Some(zero) = int_of(kind, 0) {
                    return constant(zero);
                }
            }
            ArithOp::And | ArithOp::Or => return Canonical::Replace(a),
            _ => {}
        }
    }

    let Some(y) = cb.and_then(|c| c.as_i64()) else {
        return Canonical::Unchanged;
    };
    if op.is_shift() {
        let mask = if kind == ValueKind::Long { 63 } else { 31 };
        return if y & mask == 0 {
            Canonical::Replace(a)
        } else {
            Canonical::Unchanged
        };
    }
    match (op, y) {
        (ArithOp::Add | ArithOp::Sub | ArithOp::Or | ArithOp::Xor, 0) => Canonical::Replace(a),
        (ArithOp::Mul | ArithOp::Div, 1) => Canonical::Replace(a),
        (ArithOp::And, -1) => Canonical::Replace(a),
        (ArithOp::Mul | ArithOp::And, 0) | (ArithOp::Or, -1) => match cb {
            Some(value) => constant(value),
            None => Canonical::Unchanged,
        },
        _ => Canonical::Unchanged,
    }
}

/// 折叠一元运算
pub fn fold_unary(
    op: UnaryOp,
    value: Constant,
) -> Option<Constant> {
    match (op, value) {
        (UnaryOp::Neg, Constant::Int(v)) => Some(Constant::Int(v.wrapping_neg())),
        (UnaryOp::Neg, Constant::Long(v)) => Some(Constant::Long(v.wrapping_neg())),
        // 取反只翻转符号位
        (UnaryOp::Neg, Constant::Float(bits)) => Some(Constant::Float(bits ^ (1 << 31))),
        (UnaryOp::Neg, Constant::Double(bits)) => Some(Constant::Double(bits ^ (1 << 63))),
        (UnaryOp::Not, Constant::Int(v)) => Some(Constant::Int(!v)),
        (UnaryOp::Not, Constant::Long(v)) => Some(Constant::Long(!v)),
        _ => None,
    }
}

pub fn unary(
    graph: &Graph,
    id: NodeId,
    op: UnaryOp,
    kind: ValueKind,
) -> Canonical {
    let x = graph[id].input(0);
    if let Some(value) = graph.constant_of(x) {
        return fold_unary(op, value).map_or(Canonical::Unchanged, constant);
    }
    match graph[x].kind() {
        NodeKind::Unary {
            op: inner,
            kind: inner_kind,
        } if *inner == op && *inner_kind == kind => Canonical::Replace(graph[x].input(0)),
        _ => Canonical::Unchanged,
    }
}

/// 折叠整数与空引用的比较
pub fn fold_compare(
    op: CompareOp,
    x: Constant,
    y: Constant,
) -> Option<bool> {
    match (x, y) {
        (Constant::Null, Constant::Null) if op == CompareOp::Eq => Some(true),
        _ => {
            let (a, b) = (x.as_i64()?, y.as_i64()?);
            if x.value_kind() != y.value_kind() {
                return None;
            }
            Some(match op {
                CompareOp::Eq => a == b,
                CompareOp::Lt => a < b,
                CompareOp::Below => match x {
                    Constant::Int(_) => (a as i32 as u32) < (b as i32 as u32),
                    _ => (a as u64) < (b as u64),
                },
            })
        }
    }
}

pub fn compare(
    graph: &Graph,
    id: NodeId,
    op: CompareOp,
    kind: ValueKind,
) -> Canonical {
    if kind.is_float() {
        return Canonical::Unchanged;
    }
    let node = &graph[id];
    let (a, b) = (node.input(0), node.input(1));
    if let (Some(x), Some(y)) = (graph.constant_of(a), graph.constant_of(b)) {
        return match fold_compare(op, x, y) {
            Some(result) => constant(Constant::logic(result)),
            None => Canonical::Unchanged,
        };
    }
    if a == b {
        return constant(Constant::logic(op == CompareOp::Eq));
    }
    if op == CompareOp::Eq && needs_swap(graph, a, b) {
        return swapped(NodeKind::Compare { op, kind }, a, b);
    }
    Canonical::Unchanged
}

pub fn is_null(
    graph: &Graph,
    id: NodeId,
) -> Canonical {
    let object = graph[id].input(0);
    if graph.constant_of(object) == Some(Constant::Null) {
        return constant(Constant::logic(true));
    }
    if graph.object_stamp(object).non_null {
        return constant(Constant::logic(false));
    }
    Canonical::Unchanged
}
