use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};
use crate::resp::DEFAULT_MAX_FRAME_SIZE;

/// Reader 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReaderConfig {
    /// 调用方未指定 `block` 时，单次阻塞读取的等待时间（毫秒）
    pub read_timeout_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
        }
    }
}

/// RESP 连接配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub addr: String,
    /// 非 0 时连接后执行 SELECT
    pub database: u32,
    pub connect_timeout_ms: u64,
    /// 单个回复帧的最大字节数
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            database: 0,
            connect_timeout_ms: 5000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 从 JSON 文件加载，缺失的字段取默认值
    pub fn from_json_file(path: impl AsRef<Path>) -> StreamResult<Self> {
        let data = std::fs::read(path.as_ref()).map_err(|e| {
            StreamError::Validation(format!(
                "cannot read connection config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            StreamError::Validation(format!(
                "invalid connection config {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }
}
