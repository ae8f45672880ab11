//! 静态类型事实
//!
//! 编译器对数组拷贝操作数的类型知识往往是部分的：可能完全未知、
//! 只知道上界、或精确已知。`ObjectStamp` 记录这些事实，
//! `TypeUniverse` 提供类型层次、hub 与 layout helper 查询。

use std::fmt;

use super::kind::{ArrayLayout, ElementKind};

/// 类标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// 引用类型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// 根类型：所有数组也是它的子类型
    Root,
    /// 普通（非数组）实例类
    Instance(ClassId),
    /// 基本类型数组
    PrimitiveArray(ElementKind),
    /// 引用数组，携带元素类型
    ObjectArray(Box<TypeRef>),
}

/// 数组的元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component<'a> {
    Primitive(ElementKind),
    Reference(&'a TypeRef),
}

impl TypeRef {
    /// 元素类型为 `element` 的引用数组
    pub fn array_of(element: TypeRef) -> Self {
        TypeRef::ObjectArray(Box::new(element))
    }

    /// 是否为数组类型
    pub fn is_array(&self) -> bool {
        matches!(self, TypeRef::PrimitiveArray(_) | TypeRef::ObjectArray(_))
    }

    /// 是否可证明不是数组
    pub fn is_provably_not_array(&self) -> bool {
        matches!(self, TypeRef::Instance(_))
    }

    /// 数组的元素类型
    pub fn component(&self) -> Option<Component<'_>> {
        match self {
            TypeRef::PrimitiveArray(kind) => Some(Component::Primitive(*kind)),
            TypeRef::ObjectArray(element) => Some(Component::Reference(element)),
            _ => None,
        }
    }

    /// 数组的元素种类
    pub fn component_kind(&self) -> Option<ElementKind> {
        self.component().map(|c| match c {
            Component::Primitive(kind) => kind,
            Component::Reference(_) => ElementKind::Object,
        })
    }
}

impl fmt::Display for TypeRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            TypeRef::Root => write!(f, "Object"),
            TypeRef::Instance(ClassId(id)) => write!(f, "C{}", id),
            TypeRef::PrimitiveArray(kind) => write!(f, "{}[]", kind),
            TypeRef::ObjectArray(element) => write!(f, "{}[]", element),
        }
    }
}

/// 对象值的静态类型事实
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ObjectStamp {
    /// 类型上界（None 表示一无所知）
    pub ty: Option<TypeRef>,
    /// 类型是否精确（不可能是子类型）
    pub exact: bool,
    /// 是否已知非空
    pub non_null: bool,
}

impl ObjectStamp {
    /// 毫无信息的对象
    pub fn unknown() -> Self {
        Self::default()
    }

    /// 以 `ty` 为上界
    pub fn declared(ty: TypeRef) -> Self {
        Self {
            ty: Some(ty),
            exact: false,
            non_null: false,
        }
    }

    /// 精确为 `ty`
    pub fn exact(ty: TypeRef) -> Self {
        Self {
            ty: Some(ty),
            exact: true,
            non_null: false,
        }
    }

    /// 同时标记为非空
    pub fn non_null(mut self) -> Self {
        self.non_null = true;
        self
    }
}

/// 节点结果的静态类型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stamp {
    Int,
    Long,
    Float,
    Double,
    Object(ObjectStamp),
}

impl Stamp {
    /// 对象戳
    pub fn as_object(&self) -> Option<&ObjectStamp> {
        match self {
            Stamp::Object(stamp) => Some(stamp),
            _ => None,
        }
    }
}

/// 类信息
#[derive(Debug, Clone)]
struct ClassInfo {
    name: String,
    superclass: Option<ClassId>,
}

/// 类型全集：类层次、可赋值性、hub 与 layout 查询
///
/// 作为显式协作者传给降级阶段，不存在任何全局状态。
#[derive(Debug, Clone, Default)]
pub struct TypeUniverse {
    classes: Vec<ClassInfo>,
    layout: ArrayLayout,
}

impl TypeUniverse {
    pub fn new(layout: ArrayLayout) -> Self {
        Self {
            classes: Vec::new(),
            layout,
        }
    }

    /// 数组布局
    pub fn layout(&self) -> &ArrayLayout {
        &self.layout
    }

    /// 定义一个新类
    pub fn define_class(
        &mut self,
        name: &str,
        superclass: Option<ClassId>,
    ) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassInfo {
            name: name.to_string(),
            superclass,
        });
        id
    }

    /// 类名
    pub fn class_name(
        &self,
        class: ClassId,
    ) -> Option<&str> {
        self.classes.get(class.0 as usize).map(|c| c.name.as_str())
    }

    /// `sub` 是否是 `sup` 的子类（含自身）
    pub fn is_subclass(
        &self,
        sub: ClassId,
        sup: ClassId,
    ) -> bool {
        let mut current = Some(sub);
        while let Some(class) = current {
            if class == sup {
                return true;
            }
            current = self.classes.get(class.0 as usize).and_then(|c| c.superclass);
        }
        false
    }

    /// `from` 类型的值是否可以存入 `to` 类型的位置
    pub fn is_assignable(
        &self,
        from: &TypeRef,
        to: &TypeRef,
    ) -> bool {
        match (from, to) {
            (_, TypeRef::Root) => true,
            (TypeRef::Instance(a), TypeRef::Instance(b)) => self.is_subclass(*a, *b),
            (TypeRef::PrimitiveArray(a), TypeRef::PrimitiveArray(b)) => a == b,
            (TypeRef::ObjectArray(a), TypeRef::ObjectArray(b)) => self.is_assignable(a, b),
            _ => false,
        }
    }

    /// 类型的 layout helper
    pub fn layout_helper(
        &self,
        ty: &TypeRef,
    ) -> i32 {
        match ty.component_kind() {
            Some(kind) => self.layout.array_layout_helper(kind),
            None => self.layout.instance_layout_helper(),
        }
    }
}
