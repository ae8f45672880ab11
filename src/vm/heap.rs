//! 参考执行器的堆
//!
//! 只有数组与普通实例两种对象；对象以句柄寻址，永不回收。

use std::fmt;

use crate::middle::core::kind::ElementKind;
use crate::middle::core::types::{ClassId, TypeRef};
use crate::vm::errors::{VMError, VMResult};

/// 对象句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(u32);

impl ObjectRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// 运行时值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// 引用，`None` 为空
    Ref(Option<ObjectRef>),
    /// 类型指针
    Hub(TypeRef),
}

impl Value {
    pub const NULL: Value = Value::Ref(None);

    /// 元素种类的默认值
    pub fn default_for(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Long => Value::Long(0),
            ElementKind::Float => Value::Float(0.0),
            ElementKind::Double => Value::Double(0.0),
            ElementKind::Object => Value::NULL,
            _ => Value::Int(0),
        }
    }

    pub fn as_int(&self) -> VMResult<i32> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(VMError::TypeError(format!("expected int, found {:?}", other))),
        }
    }

    pub fn as_object(&self) -> VMResult<Option<ObjectRef>> {
        match self {
            Value::Ref(r) => Ok(*r),
            other => Err(VMError::TypeError(format!("expected reference, found {:?}", other))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Float(v) => write!(f, "{}f", v),
            Value::Double(v) => write!(f, "{}d", v),
            Value::Ref(Some(r)) => write!(f, "{}", r),
            Value::Ref(None) => write!(f, "null"),
            Value::Hub(ty) => write!(f, "hub({})", ty),
        }
    }
}

/// 堆对象
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    Array { ty: TypeRef, elements: Vec<Value> },
    Instance { class: ClassId },
}

impl HeapObject {
    pub fn type_ref(&self) -> TypeRef {
        match self {
            HeapObject::Array { ty, .. } => ty.clone(),
            HeapObject::Instance { class } => TypeRef::Instance(*class),
        }
    }
}

/// 堆
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(
        &mut self,
        object: HeapObject,
    ) -> ObjectRef {
        let r = ObjectRef(self.objects.len() as u32);
        self.objects.push(object);
        r
    }

    /// 分配数组
    ///
    /// `ty` 必须是数组类型。
    pub fn alloc_array(
        &mut self,
        ty: TypeRef,
        elements: Vec<Value>,
    ) -> VMResult<ObjectRef> {
        if !ty.is_array() {
            return Err(VMError::TypeError(format!("{} is not an array type", ty)));
        }
        Ok(self.alloc(HeapObject::Array { ty, elements }))
    }

    /// 分配以默认值填充的数组
    pub fn new_array(
        &mut self,
        ty: TypeRef,
        length: usize,
    ) -> VMResult<ObjectRef> {
        let kind = ty
            .component_kind()
            .ok_or_else(|| VMError::TypeError(format!("{} is not an array type", ty)))?;
        self.alloc_array(ty, vec![Value::default_for(kind); length])
    }

    /// `int[]` 便捷构造
    pub fn int_array(
        &mut self,
        values: &[i32],
    ) -> ObjectRef {
        self.alloc(HeapObject::Array {
            ty: TypeRef::PrimitiveArray(ElementKind::Int),
            elements: values.iter().map(|v| Value::Int(*v)).collect(),
        })
    }

    pub fn alloc_instance(
        &mut self,
        class: ClassId,
    ) -> ObjectRef {
        self.alloc(HeapObject::Instance { class })
    }

    pub fn get(
        &self,
        r: ObjectRef,
    ) -> VMResult<&HeapObject> {
        self.objects.get(r.index()).ok_or(VMError::DanglingReference(r.index()))
    }

    /// 对象的运行时类型
    pub fn type_of(
        &self,
        r: ObjectRef,
    ) -> VMResult<TypeRef> {
        Ok(self.get(r)?.type_ref())
    }

    /// 数组的元素切片
    pub fn elements(
        &self,
        r: ObjectRef,
    ) -> VMResult<&[Value]> {
        match self.get(r)? {
            HeapObject::Array { elements, .. } => Ok(elements),
            HeapObject::Instance { .. } => Err(VMError::TypeError(format!("{} is not an array", r))),
        }
    }

    pub fn elements_mut(
        &mut self,
        r: ObjectRef,
    ) -> VMResult<&mut Vec<Value>> {
        match self.objects.get_mut(r.index()) {
            Some(HeapObject::Array { elements, .. }) => Ok(elements),
            Some(HeapObject::Instance { .. }) => Err(VMError::TypeError(format!("{} is not an array", r))),
            None => Err(VMError::DanglingReference(r.index())),
        }
    }

    pub fn array_length(
        &self,
        r: ObjectRef,
    ) -> VMResult<usize> {
        Ok(self.elements(r)?.len())
    }

    /// 读取 `int[]` 的全部元素
    pub fn int_values(
        &self,
        r: ObjectRef,
    ) -> VMResult<Vec<i32>> {
        self.elements(r)?.iter().map(Value::as_int).collect()
    }
}
