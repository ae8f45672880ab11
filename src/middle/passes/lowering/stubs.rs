//! 拷贝桩注册表
//!
//! 按 (元素种类, 对齐, 不相交, 未初始化, 写入位置) 解析运行时拷贝桩。
//! 未注册的组合是致命错误。

use indexmap::IndexMap;
use tracing::trace;

use crate::middle::core::kind::ElementKind;
use crate::middle::core::location::LocationIdentity;
use crate::middle::core::node::StubDescriptor;

use super::error::{LoweringError, LoweringResult};

/// 桩查找键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StubKey {
    pub kind: ElementKind,
    pub aligned: bool,
    pub disjoint: bool,
    pub uninitialized: bool,
    pub location: LocationIdentity,
}

impl StubKey {
    /// 桩的符号名：`[arrayof_]<kind>_[disjoint_]arraycopy[_uninit]`
    pub fn stub_name(&self) -> String {
        format!(
            "{}{}_{}arraycopy{}",
            if self.aligned { "arrayof_" } else { "" },
            self.kind.stub_name(),
            if self.disjoint { "disjoint_" } else { "" },
            if self.uninitialized { "_uninit" } else { "" },
        )
    }

    fn of(descriptor: &StubDescriptor) -> Self {
        Self {
            kind: descriptor.kind,
            aligned: descriptor.aligned,
            disjoint: descriptor.disjoint,
            uninitialized: descriptor.uninitialized,
            location: descriptor.killed,
        }
    }

    fn descriptor(self) -> StubDescriptor {
        StubDescriptor {
            name: self.stub_name(),
            kind: self.kind,
            aligned: self.aligned,
            disjoint: self.disjoint,
            uninitialized: self.uninitialized,
            killed: self.location,
        }
    }
}

/// 拷贝桩注册表（保持注册顺序）
#[derive(Debug, Clone, Default)]
pub struct StubRegistry {
    stubs: IndexMap<StubKey, StubDescriptor>,
}

impl StubRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 预先注册所有标准桩
    ///
    /// 每种元素种类注册其数组位置与初始化位置上的全部标志组合，
    /// 引用数组另外注册 `Any` 位置。
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ElementKind::ALL {
            let mut locations = vec![LocationIdentity::array(kind), LocationIdentity::Init];
            if kind.is_reference() {
                locations.push(LocationIdentity::Any);
            }
            for location in locations {
                for bits in 0..8u8 {
                    let key = StubKey {
                        kind,
                        aligned: bits & 1 != 0,
                        disjoint: bits & 2 != 0,
                        uninitialized: bits & 4 != 0,
                        location,
                    };
                    registry.register(key.descriptor());
                }
            }
        }
        registry
    }

    /// 注册桩，返回被替换的旧描述
    pub fn register(
        &mut self,
        descriptor: StubDescriptor,
    ) -> Option<StubDescriptor> {
        self.stubs.insert(StubKey::of(&descriptor), descriptor)
    }

    /// 解析桩
    pub fn resolve(
        &self,
        key: StubKey,
    ) -> LoweringResult<&StubDescriptor> {
        match self.stubs.get(&key) {
            Some(stub) => {
                trace!(stub = %stub.name, "resolved arraycopy stub");
                Ok(stub)
            }
            None => Err(LoweringError::MissingStub {
                kind: key.kind,
                aligned: key.aligned,
                disjoint: key.disjoint,
                uninitialized: key.uninitialized,
                location: key.location,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// 按注册顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &StubDescriptor> {
        self.stubs.values()
    }
}
