//! 数组拷贝节点
//!
//! `CopyNode` 是一次批量数组拷贝在图中的高层表示：五个操作数
//! （源、源偏移、目标、目标偏移、长度）作为节点输入，其余的元素种类、
//! 内存位置标签与对齐/不相交标志保存在这里。
//!
//! `DelayedCopyNode` 由策略分类器创建，记录选定的片段与展开所需的
//! 流水线阶段，等待驱动器在阶段满足后展开。

use std::fmt;

use super::error::IrError;
use super::graph::NodeId;
use super::kind::{ArrayLayout, ElementKind};
use super::location::{LocationIdentity, MemoryEffects};
use super::stage::GuardsStage;

/// 拷贝节点的操作数下标
pub const SRC: usize = 0;
pub const SRC_POS: usize = 1;
pub const DEST: usize = 2;
pub const DEST_POS: usize = 3;
pub const LENGTH: usize = 4;
/// 操作数个数
pub const OPERAND_COUNT: usize = 5;

/// 一个偏移操作数的静态事实
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetFact {
    pub node: NodeId,
    pub constant: Option<i32>,
}

/// 批量数组拷贝
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CopyNode {
    kind: ElementKind,
    read_identity: LocationIdentity,
    kill_identity: LocationIdentity,
    aligned: bool,
    disjoint: bool,
    uninitialized: bool,
    exact: bool,
    refined: bool,
    bci: i32,
}

impl CopyNode {
    /// 创建拷贝节点，读写集合默认为该元素种类的数组位置
    pub fn new(
        kind: ElementKind,
        bci: i32,
    ) -> Self {
        let location = LocationIdentity::array(kind);
        Self {
            kind,
            read_identity: location,
            kill_identity: location,
            aligned: false,
            disjoint: false,
            uninitialized: false,
            exact: false,
            refined: false,
            bci,
        }
    }

    /// 覆盖写入集合
    ///
    /// 只有引用数组可以杀死 `Any`：存储检查可能触及任意子类型。
    pub fn with_kill_identity(
        mut self,
        location: LocationIdentity,
    ) -> Result<Self, IrError> {
        if location.is_any() && self.kind.is_primitive() {
            return Err(IrError::InvalidKillLocation {
                kind: self.kind,
                location,
            });
        }
        self.kill_identity = location;
        Ok(self)
    }

    /// 标记编译器已证明源数组类型可精确赋值给目标数组
    pub fn with_exact(
        mut self,
        exact: bool,
    ) -> Self {
        self.exact = exact;
        self
    }

    /// 目标是刚分配的数组，只写初始化内存
    pub fn uninitialized(mut self) -> Self {
        self.uninitialized = true;
        self.kill_identity = LocationIdentity::Init;
        self
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn read_identity(&self) -> LocationIdentity {
        self.read_identity
    }

    pub fn kill_identity(&self) -> LocationIdentity {
        self.kill_identity
    }

    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    pub fn is_disjoint(&self) -> bool {
        self.disjoint
    }

    pub fn is_uninitialized(&self) -> bool {
        self.uninitialized
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// 对齐/不相交信息是否已经细化过
    pub fn is_refined(&self) -> bool {
        self.refined
    }

    /// 字节码位置
    pub fn bci(&self) -> i32 {
        self.bci
    }

    /// 只写初始化内存的拷贝对其他读者不可见
    pub fn has_side_effect(&self) -> bool {
        !self.kill_identity.is_init()
    }

    pub fn memory_effects(&self) -> MemoryEffects {
        MemoryEffects::read_kill(self.read_identity, self.kill_identity)
    }

    /// 根据偏移的静态事实细化对齐与不相交标志
    ///
    /// 只在第一次调用时生效；标志只会从“未知”变为“已证明”。
    pub fn update_aligned_disjoint(
        &mut self,
        src_pos: OffsetFact,
        dest_pos: OffsetFact,
        layout: &ArrayLayout,
    ) {
        if self.refined {
            return;
        }
        self.refined = true;

        let same_offset =
            src_pos.node == dest_pos.node || (src_pos.constant.is_some() && src_pos.constant == dest_pos.constant);
        if same_offset {
            self.disjoint = true;
        }
        if let (Some(src), Some(dest)) = (src_pos.constant, dest_pos.constant) {
            if layout.is_heap_word_aligned(self.kind, src as i64)
                && layout.is_heap_word_aligned(self.kind, dest as i64)
            {
                self.aligned = true;
            }
            // 源在目标之后时，自低向高遍历总是安全的
            if src >= dest {
                self.disjoint = true;
            }
        }
    }
}

impl fmt::Display for CopyNode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "ArrayCopy[{}]", self.kind)?;
        if self.aligned {
            write!(f, " aligned")?;
        }
        if self.disjoint {
            write!(f, " disjoint")?;
        }
        if self.uninitialized {
            write!(f, " uninit")?;
        }
        write!(f, " @bci {}", self.bci)
    }
}

/// 仍需执行的动态类型检查
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCheckKind {
    /// 失败已成定局，由完全检查的慢路径负责
    Undefined,
    /// 无需检查
    None,
    /// 比较两侧的 hub 是否相同
    HubBased,
    /// 比较两侧的 layout helper 是否相同
    LayoutHelperBased,
}

/// 降级片段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SnippetId {
    /// 调用完全检查的运行时例程，由它抛出客体异常
    NativeExceptionPath,
    /// 直接调用拷贝桩
    StubCall,
    /// 展开为显式元素循环
    ExpandedLoopStubCall,
    /// 通用运行时拷贝，自行完成全部校验
    Generic,
    /// 逐元素存储检查
    Checkcast,
}

impl SnippetId {
    pub const ALL: [SnippetId; 5] = [
        SnippetId::NativeExceptionPath,
        SnippetId::StubCall,
        SnippetId::ExpandedLoopStubCall,
        SnippetId::Generic,
        SnippetId::Checkcast,
    ];

    /// 是否总是延迟展开
    pub fn is_deferred(self) -> bool {
        matches!(
            self,
            SnippetId::ExpandedLoopStubCall | SnippetId::Generic | SnippetId::Checkcast
        )
    }

    /// 展开所需的最早阶段
    pub fn required_stage(self) -> GuardsStage {
        match self {
            SnippetId::NativeExceptionPath => GuardsStage::FloatingGuards,
            SnippetId::StubCall | SnippetId::ExpandedLoopStubCall => GuardsStage::FixedDeopts,
            // 逐元素失败可能发生在部分副作用之后
            SnippetId::Generic | SnippetId::Checkcast => GuardsStage::AfterFsa,
        }
    }

    /// 展开结果是否可能抛出客体异常
    pub fn may_throw(self) -> bool {
        matches!(
            self,
            SnippetId::NativeExceptionPath | SnippetId::Generic | SnippetId::Checkcast
        )
    }
}

impl fmt::Display for SnippetId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            SnippetId::NativeExceptionPath => "arraycopyNativeExceptionSnippet",
            SnippetId::StubCall => "arraycopyExactStubCallSnippet",
            SnippetId::ExpandedLoopStubCall => "arraycopyExactSnippet",
            SnippetId::Generic => "arraycopyGenericSnippet",
            SnippetId::Checkcast => "arraycopyCheckcastSnippet",
        };
        write!(f, "{}", name)
    }
}

/// 延迟降级状态
///
/// `Created` 与 `NonThrowing` 在阶段满足后表现为 `Eligible`；
/// `Expanded` 与 `Dead` 是终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayedState {
    /// 已创建，阶段尚未满足
    Created,
    /// 异常边已被证明不可达，阶段尚未满足
    NonThrowing,
    /// 可以展开
    Eligible,
    /// 已展开为片段
    Expanded,
    /// 长度为零，已被删除
    Dead,
}

impl DelayedState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DelayedState::Expanded | DelayedState::Dead)
    }
}

/// 延迟降级的数组拷贝
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DelayedCopyNode {
    copy: CopyNode,
    snippet: SnippetId,
    required_stage: GuardsStage,
    may_throw: bool,
    check: TypeCheckKind,
    location: LocationIdentity,
    lifecycle: DelayedState,
}

impl DelayedCopyNode {
    pub fn new(
        copy: CopyNode,
        snippet: SnippetId,
        check: TypeCheckKind,
        location: LocationIdentity,
    ) -> Self {
        Self {
            copy,
            snippet,
            required_stage: snippet.required_stage(),
            may_throw: snippet.may_throw(),
            check,
            location,
            lifecycle: DelayedState::Created,
        }
    }

    pub fn copy(&self) -> &CopyNode {
        &self.copy
    }

    pub fn copy_mut(&mut self) -> &mut CopyNode {
        &mut self.copy
    }

    pub fn snippet(&self) -> SnippetId {
        self.snippet
    }

    pub fn required_stage(&self) -> GuardsStage {
        self.required_stage
    }

    pub fn may_throw(&self) -> bool {
        self.may_throw
    }

    pub fn check(&self) -> TypeCheckKind {
        self.check
    }

    /// 传给片段的内存位置
    pub fn location(&self) -> LocationIdentity {
        self.location
    }

    /// 图的当前阶段是否允许展开
    pub fn reached_required_stage(
        &self,
        stage: GuardsStage,
    ) -> bool {
        stage >= self.required_stage
    }

    /// 在阶段 `stage` 下所处的状态
    pub fn state(
        &self,
        stage: GuardsStage,
    ) -> DelayedState {
        if !self.lifecycle.is_terminal() && self.reached_required_stage(stage) {
            DelayedState::Eligible
        } else {
            self.lifecycle
        }
    }

    /// 分析已证明异常边不可达
    pub fn set_non_throwing(&mut self) {
        self.may_throw = false;
        if self.lifecycle == DelayedState::Created {
            self.lifecycle = DelayedState::NonThrowing;
        }
    }

    /// 进入 `Expanded`；只有 `Eligible` 可以展开，否则返回当前状态
    pub fn expand(
        &mut self,
        stage: GuardsStage,
    ) -> Result<(), DelayedState> {
        match self.state(stage) {
            DelayedState::Eligible => {
                self.lifecycle = DelayedState::Expanded;
                Ok(())
            }
            other => Err(other),
        }
    }

    /// 进入 `Dead`；终态不再变化
    pub fn kill(&mut self) -> DelayedState {
        if !self.lifecycle.is_terminal() {
            self.lifecycle = DelayedState::Dead;
        }
        self.lifecycle
    }
}

impl fmt::Display for DelayedCopyNode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "Delayed{} via {} until {}",
            self.copy, self.snippet, self.required_stage
        )
    }
}
