//! Lowering configuration
//!
//! 降级流水线的可调参数，从 `strata.toml` 读取；缺省字段取默认值。
//!
//! ```toml
//! log_level = "info"
//!
//! [lowering]
//! expand_arraycopy_loops = false
//! inline_loop_limit = 16
//! max_canonical_rounds = 64
//!
//! [layout]
//! heap_word_size = 8
//! compressed_references = true
//! ```
//!
//! # Usage
//!
//! ```rust
//! use strata::util::config::StrataConfig;
//!
//! let config = StrataConfig::from_toml_str("[lowering]\ninline_loop_limit = 8").unwrap();
//! assert_eq!(config.lowering.inline_loop_limit, 8);
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::middle::core::kind::ArrayLayout;
use crate::middle::passes::lowering::LoweringPolicy;
use crate::util::logger::LogLevel;

/// 配置文件名
pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// 顶层配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StrataConfig {
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub lowering: LoweringConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
}

/// 降级策略配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoweringConfig {
    /// 把数组拷贝桩调用展开为显式循环
    #[serde(default)]
    pub expand_arraycopy_loops: bool,
    /// 常量长度不超过该值的拷贝展开为循环（0 关闭）
    #[serde(default)]
    pub inline_loop_limit: u32,
    /// 规范化扫描轮数上限
    #[serde(default = "default_max_canonical_rounds")]
    pub max_canonical_rounds: usize,
}

fn default_max_canonical_rounds() -> usize {
    64
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            expand_arraycopy_loops: false,
            inline_loop_limit: 0,
            max_canonical_rounds: default_max_canonical_rounds(),
        }
    }
}

impl LoweringConfig {
    pub fn policy(&self) -> LoweringPolicy {
        LoweringPolicy {
            expand_loops: self.expand_arraycopy_loops,
            inline_loop_limit: self.inline_loop_limit,
            max_canonical_rounds: self.max_canonical_rounds,
        }
    }
}

/// 平台布局配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_heap_word_size")]
    pub heap_word_size: u32,
    /// 决定引用数组的元素步长
    #[serde(default = "default_compressed_references")]
    pub compressed_references: bool,
}

fn default_heap_word_size() -> u32 {
    8
}

fn default_compressed_references() -> bool {
    true
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            heap_word_size: default_heap_word_size(),
            compressed_references: default_compressed_references(),
        }
    }
}

impl LayoutConfig {
    pub fn layout(&self) -> ArrayLayout {
        ArrayLayout {
            heap_word_size: self.heap_word_size,
            compressed_references: self.compressed_references,
            ..ArrayLayout::default()
        }
    }
}

impl StrataConfig {
    /// 从 TOML 文本解析
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StrataConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件读取
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 读取目录中的 `strata.toml`，不存在时返回默认配置
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// 写回 TOML
    pub fn save(
        &self,
        path: &Path,
    ) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let word = self.layout.heap_word_size;
        if word == 0 || !word.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "heap_word_size must be a power of two, got {}",
                word
            )));
        }
        if self.lowering.max_canonical_rounds == 0 {
            return Err(ConfigError::Invalid("max_canonical_rounds must be positive".to_string()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
