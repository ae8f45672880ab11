//! 流水线阶段
//!
//! 单调推进的阶段标记，表示当前图上哪些去优化不变式已经成立。

use std::fmt;

/// 守卫阶段
///
/// 顺序有意义：`FloatingGuards < FixedDeopts < AfterFsa`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum GuardsStage {
    /// 守卫仍可浮动
    #[default]
    FloatingGuards,
    /// 去优化点已固定
    FixedDeopts,
    /// 帧状态已分配到副作用节点之后（frame state assignment 完成）
    AfterFsa,
}

impl GuardsStage {
    /// 所有阶段，按推进顺序
    pub const ALL: [GuardsStage; 3] = [
        GuardsStage::FloatingGuards,
        GuardsStage::FixedDeopts,
        GuardsStage::AfterFsa,
    ];

    /// 下一个阶段
    pub fn next(self) -> Option<GuardsStage> {
        match self {
            GuardsStage::FloatingGuards => Some(GuardsStage::FixedDeopts),
            GuardsStage::FixedDeopts => Some(GuardsStage::AfterFsa),
            GuardsStage::AfterFsa => None,
        }
    }

    /// 去优化是否已固定
    pub fn are_deopts_fixed(self) -> bool {
        self >= GuardsStage::FixedDeopts
    }

    /// 帧状态是否已挂在副作用节点上
    pub fn are_frame_states_at_side_effects(self) -> bool {
        self >= GuardsStage::AfterFsa
    }
}

impl fmt::Display for GuardsStage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            GuardsStage::FloatingGuards => "FloatingGuards",
            GuardsStage::FixedDeopts => "FixedDeopts",
            GuardsStage::AfterFsa => "AfterFsa",
        };
        write!(f, "{}", name)
    }
}
