//! 元素种类与数组布局
//!
//! `ElementKind` 描述数组元素的存储种类，`ArrayLayout` 给出平台相关的
//! 数组基址偏移、元素步长与 layout helper 编码。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 数组元素种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Object,
}

impl ElementKind {
    /// 所有元素种类
    pub const ALL: [ElementKind; 9] = [
        ElementKind::Boolean,
        ElementKind::Byte,
        ElementKind::Short,
        ElementKind::Char,
        ElementKind::Int,
        ElementKind::Long,
        ElementKind::Float,
        ElementKind::Double,
        ElementKind::Object,
    ];

    /// 是否为引用类型
    pub fn is_reference(self) -> bool {
        matches!(self, ElementKind::Object)
    }

    /// 是否为基本类型
    pub fn is_primitive(self) -> bool {
        !self.is_reference()
    }

    /// 元素在寄存器中的值种类
    pub fn value_kind(self) -> ValueKind {
        match self {
            ElementKind::Boolean
            | ElementKind::Byte
            | ElementKind::Short
            | ElementKind::Char
            | ElementKind::Int => ValueKind::Int,
            ElementKind::Long => ValueKind::Long,
            ElementKind::Float => ValueKind::Float,
            ElementKind::Double => ValueKind::Double,
            ElementKind::Object => ValueKind::Object,
        }
    }

    /// 运行时桩命名所用的类型名
    pub fn stub_name(self) -> &'static str {
        match self {
            ElementKind::Boolean => "jboolean",
            ElementKind::Byte => "jbyte",
            ElementKind::Short => "jshort",
            ElementKind::Char => "jchar",
            ElementKind::Int => "jint",
            ElementKind::Long => "jlong",
            ElementKind::Float => "jfloat",
            ElementKind::Double => "jdouble",
            ElementKind::Object => "oop",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            ElementKind::Boolean => "boolean",
            ElementKind::Byte => "byte",
            ElementKind::Short => "short",
            ElementKind::Char => "char",
            ElementKind::Int => "int",
            ElementKind::Long => "long",
            ElementKind::Float => "float",
            ElementKind::Double => "double",
            ElementKind::Object => "Object",
        };
        write!(f, "{}", name)
    }
}

/// 值种类（栈上的表示宽度）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Object,
}

impl ValueKind {
    /// 是否为浮点
    pub fn is_float(self) -> bool {
        matches!(self, ValueKind::Float | ValueKind::Double)
    }

    /// 整数位宽（非整数返回 None）
    pub fn int_bits(self) -> Option<u32> {
        match self {
            ValueKind::Int => Some(32),
            ValueKind::Long => Some(64),
            _ => None,
        }
    }
}

/// 数组 layout helper 中的标签位
const LH_ARRAY_TAG_PRIMITIVE: i32 = 0x2;
const LH_ARRAY_TAG_OBJECT: i32 = 0x3;

/// 平台相关的数组布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLayout {
    /// 堆字大小（字节）
    pub heap_word_size: u32,
    /// 是否启用压缩引用
    pub compressed_references: bool,
    /// 数组头大小（对象头 + 长度字段）
    pub array_header_size: u32,
    /// 普通对象实例大小
    pub instance_size: u32,
}

impl Default for ArrayLayout {
    fn default() -> Self {
        Self {
            heap_word_size: 8,
            compressed_references: true,
            array_header_size: 16,
            instance_size: 16,
        }
    }
}

impl ArrayLayout {
    /// 数组第一个元素相对于对象起始的偏移
    pub fn array_base_offset(
        &self,
        _kind: ElementKind,
    ) -> u32 {
        self.array_header_size
    }

    /// 元素步长（字节）
    pub fn array_index_scale(
        &self,
        kind: ElementKind,
    ) -> u32 {
        match kind {
            ElementKind::Boolean | ElementKind::Byte => 1,
            ElementKind::Short | ElementKind::Char => 2,
            ElementKind::Int | ElementKind::Float => 4,
            ElementKind::Long | ElementKind::Double => 8,
            ElementKind::Object => {
                if self.compressed_references {
                    4
                } else {
                    8
                }
            }
        }
    }

    /// 给定下标处的元素地址是否按堆字对齐
    pub fn is_heap_word_aligned(
        &self,
        kind: ElementKind,
        index: i64,
    ) -> bool {
        let offset = self.array_base_offset(kind) as i64 + index * self.array_index_scale(kind) as i64;
        offset.rem_euclid(self.heap_word_size as i64) == 0
    }

    /// 数组类的 layout helper 编码
    ///
    /// 所有引用数组共享同一个编码，因此比较 layout helper 只能证明
    /// 两个数组的形状相同，不能证明类型相同。
    pub fn array_layout_helper(
        &self,
        kind: ElementKind,
    ) -> i32 {
        let tag = if kind.is_reference() {
            LH_ARRAY_TAG_OBJECT
        } else {
            LH_ARRAY_TAG_PRIMITIVE
        };
        let log2_scale = self.array_index_scale(kind).trailing_zeros() as i32;
        let element_type = kind as i32;
        (tag << 30) | ((self.array_header_size as i32) << 16) | (element_type << 8) | log2_scale
    }

    /// 普通实例类的 layout helper（正数，等于实例大小）
    pub fn instance_layout_helper(&self) -> i32 {
        self.instance_size as i32
    }
}
