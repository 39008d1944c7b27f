//! Stream 条目数据模型

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// 未分配的条目 ID：追加时由存储端生成
pub const NEW_ENTRY_ID: &str = "*";

/// 条目内容：字段名唯一，值统一为字符串
pub type Payload = BTreeMap<String, String>;

/// Stream 中的一条记录
///
/// 构造后不可变。分配 ID 时通过 [`Entry::with_id`] 生成新实例，
/// 原实例保持不变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    stream: String,
    id: String,
    payload: Payload,
}

impl Entry {
    /// 创建待追加的条目（ID 为 `*`）
    pub fn new<S, I, K, V>(stream: S, payload: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            stream: stream.into(),
            id: NEW_ENTRY_ID.to_string(),
            payload: payload
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// 从 JSON 对象创建条目
    ///
    /// 数字和布尔值转为字符串；null、数组、嵌套对象无法表示为字符串，返回校验错误。
    pub fn from_json(stream: impl Into<String>, value: &serde_json::Value) -> StreamResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            StreamError::Validation("payload must be a JSON object".to_string())
        })?;

        let mut payload = Payload::new();
        for (key, value) in object {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null
                | serde_json::Value::Array(_)
                | serde_json::Value::Object(_) => {
                    return Err(StreamError::Validation(format!(
                        "field '{}' cannot be represented as a string",
                        key
                    )));
                }
            };
            payload.insert(key.clone(), text);
        }

        Ok(Self {
            stream: stream.into(),
            id: NEW_ENTRY_ID.to_string(),
            payload,
        })
    }

    /// 从存储端回复构造已分配 ID 的条目
    pub(crate) fn resolved(stream: String, id: String, payload: Payload) -> Self {
        Self {
            stream,
            id,
            payload,
        }
    }

    /// 返回一个 ID 替换为 `id` 的新条目
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            stream: self.stream.clone(),
            id: id.into(),
            payload: self.payload.clone(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.payload.get(field).map(String::as_str)
    }

    /// ID 是否已由存储端分配
    pub fn is_resolved(&self) -> bool {
        self.id != NEW_ENTRY_ID
    }
}

/// 存储端分配的条目 ID: `<毫秒时间戳>-<序号>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// 在 `self` 之后、不早于 `now_ms` 的下一个 ID；ID 空间耗尽时返回 None
    pub fn next_after(&self, now_ms: u64) -> Option<Self> {
        if now_ms > self.ms {
            return Some(Self::new(now_ms, 0));
        }
        match self.seq.checked_add(1) {
            Some(seq) => Some(Self::new(self.ms, seq)),
            None => self.ms.checked_add(1).map(|ms| Self::new(ms, 0)),
        }
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            StreamError::Validation(format!("invalid stream ID: '{}'", s))
        };

        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms.parse::<u64>().map_err(|_| invalid())?;
        let seq = seq.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self { ms, seq })
    }
}
