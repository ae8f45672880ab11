//! 降级片段模板与缓存
//!
//! 模板是某个片段在某个流水线阶段下的展开配方：先做哪些校验，
//! 再用哪种方式搬运数据。实例化时把实际操作数绑定到配方上。
//!
//! # 缓存
//!
//! 模板按 `(SnippetId, GuardsStage)` 缓存，跨编译共享：
//! - 读多写少，使用 `parking_lot::RwLock`
//! - 每个键对应一个 `OnceCell` 槽位，并发首次构造只会有一个胜出者

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::debug;

use crate::middle::core::copy::SnippetId;
use crate::middle::core::node::RuntimeTarget;
use crate::middle::core::stage::GuardsStage;

/// 数据搬运方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// 调用解析出的拷贝桩
    Stub,
    /// 显式元素循环
    ElementLoop,
    /// 逐元素存储检查
    StoreCheck,
    /// 调用运行时例程
    Runtime(RuntimeTarget),
}

/// 展开配方
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetTemplate {
    pub snippet: SnippetId,
    pub stage: GuardsStage,
    /// 是否发出空检查、类型检查与边界检查
    pub validates: bool,
    pub transfer: Transfer,
    /// 展开后的调用是否可能抛出客体异常
    pub may_throw: bool,
}

impl SnippetTemplate {
    /// 构造模板
    pub fn build(
        snippet: SnippetId,
        stage: GuardsStage,
    ) -> Self {
        let (validates, transfer) = match snippet {
            SnippetId::NativeExceptionPath => (false, Transfer::Runtime(RuntimeTarget::CheckedArraycopy)),
            SnippetId::StubCall => (true, Transfer::Stub),
            SnippetId::ExpandedLoopStubCall => (true, Transfer::ElementLoop),
            SnippetId::Generic => (false, Transfer::Runtime(RuntimeTarget::GenericArraycopy)),
            SnippetId::Checkcast => (true, Transfer::StoreCheck),
        };
        Self {
            snippet,
            stage,
            validates,
            transfer,
            may_throw: snippet.may_throw(),
        }
    }
}

type TemplateKey = (SnippetId, GuardsStage);
type TemplateSlot = Arc<OnceCell<Arc<SnippetTemplate>>>;

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 命中次数
    pub hits: usize,
    /// 未命中次数
    pub misses: usize,
    /// 实际构造模板的次数
    pub builds: usize,
    /// 当前条目数
    pub entries: usize,
}

impl CacheStats {
    /// 命中率（百分比）
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// 线程安全的模板缓存
#[derive(Debug, Default)]
pub struct SnippetCache {
    templates: RwLock<HashMap<TemplateKey, TemplateSlot>>,
    stats: RwLock<CacheStats>,
}

impl SnippetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出模板，不存在时构造
    pub fn get_or_build(
        &self,
        snippet: SnippetId,
        stage: GuardsStage,
    ) -> Arc<SnippetTemplate> {
        let key = (snippet, stage);
        let existing = self.templates.read().get(&key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut templates = self.templates.write();
                let slot = templates.entry(key).or_default().clone();
                let entries = templates.len();
                drop(templates);
                self.stats.write().entries = entries;
                slot
            }
        };

        if let Some(template) = slot.get() {
            self.stats.write().hits += 1;
            return template.clone();
        }
        self.stats.write().misses += 1;
        slot.get_or_init(|| {
            debug!(%snippet, %stage, "build snippet template");
            self.stats.write().builds += 1;
            Arc::new(SnippetTemplate::build(snippet, stage))
        })
        .clone()
    }

    /// 模板是否已构造
    pub fn contains(
        &self,
        snippet: SnippetId,
        stage: GuardsStage,
    ) -> bool {
        self.templates
            .read()
            .get(&(snippet, stage))
            .is_some_and(|slot| slot.get().is_some())
    }

    /// 清空缓存
    pub fn clear(&self) {
        self.templates.write().clear();
        self.stats.write().entries = 0;
    }

    /// 获取缓存统计信息
    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}
