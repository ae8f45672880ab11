//! 内存效果模型
//!
//! `LocationIdentity` 是一组可能互为别名的内存位置的不透明标签：
//! `Any` 与一切位置重叠，不同的具体标签永不重叠。
//! 节点通过 `MemoryEffects` 声明读取/写入集合，调度与规范化据此保持顺序。

use std::fmt;

use super::kind::ElementKind;

/// 内存位置标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationIdentity {
    /// 任意内存
    Any,
    /// 仅初始化内存：刚分配、尚未对其他读者可见的对象
    Init,
    /// 某种元素种类的数组元素
    ArrayElement(ElementKind),
    /// 数组长度字段（不可变）
    ArrayLength,
    /// 对象头中的类型指针（不可变）
    Hub,
}

impl LocationIdentity {
    /// 指定元素种类的数组位置
    pub fn array(kind: ElementKind) -> Self {
        LocationIdentity::ArrayElement(kind)
    }

    pub fn is_any(self) -> bool {
        matches!(self, LocationIdentity::Any)
    }

    pub fn is_init(self) -> bool {
        matches!(self, LocationIdentity::Init)
    }

    /// 是否为一个具体的等价类（非 `Any`）
    pub fn is_single(self) -> bool {
        !self.is_any()
    }

    /// 位置是否不可变（写入不会杀死它）
    pub fn is_immutable(self) -> bool {
        matches!(self, LocationIdentity::ArrayLength | LocationIdentity::Hub)
    }

    /// 两个位置是否可能互为别名
    pub fn overlaps(
        self,
        other: LocationIdentity,
    ) -> bool {
        self.is_any() || other.is_any() || self == other
    }
}

impl fmt::Display for LocationIdentity {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            LocationIdentity::Any => write!(f, "ANY_LOCATION"),
            LocationIdentity::Init => write!(f, "INIT_LOCATION"),
            LocationIdentity::ArrayElement(kind) => write!(f, "[{}", kind),
            LocationIdentity::ArrayLength => write!(f, "ARRAY_LENGTH"),
            LocationIdentity::Hub => write!(f, "HUB"),
        }
    }
}

/// 单个节点的内存效果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryEffects {
    /// 读取的位置
    pub read: Option<LocationIdentity>,
    /// 写入（杀死）的位置
    pub kill: Option<LocationIdentity>,
}

impl MemoryEffects {
    /// 无内存效果
    pub fn none() -> Self {
        Self::default()
    }

    /// 只读
    pub fn reads(location: LocationIdentity) -> Self {
        Self {
            read: Some(location),
            kill: None,
        }
    }

    /// 读取并写入
    pub fn read_kill(
        read: LocationIdentity,
        kill: LocationIdentity,
    ) -> Self {
        Self {
            read: Some(read),
            kill: Some(kill),
        }
    }

    /// 是否有任何内存效果
    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.kill.is_none()
    }

    /// 两个节点是否必须保持相对顺序
    ///
    /// 当一方写入的位置与另一方读取或写入的位置重叠时冲突；
    /// 两个纯读取从不冲突。
    pub fn conflicts_with(
        &self,
        other: &MemoryEffects,
    ) -> bool {
        let kills = |a: &MemoryEffects, b: &MemoryEffects| match a.kill {
            Some(kill) => {
                b.read.is_some_and(|r| kill.overlaps(r)) || b.kill.is_some_and(|k| kill.overlaps(k))
            }
            None => false,
        };
        kills(self, other) || kills(other, self)
    }
}
