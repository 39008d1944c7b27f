//! Redis 协议 (RESP) 支持
//!
//! 客户端侧的 RESP2 异步解析和编码，供 [`crate::RespClient`] 使用

mod encoder;
mod parser;

pub use encoder::AsyncRespEncoder;
pub use parser::{AsyncRespParser, DEFAULT_MAX_FRAME_SIZE};

use std::io;

/// RESP 数据类型
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// 简单字符串: +OK\r\n
    SimpleString(String),
    /// 错误: -ERR message\r\n
    Error(String),
    /// 整数: :123\r\n
    Integer(i64),
    /// 批量字符串: $5\r\nhello\r\n
    BulkString(Option<Vec<u8>>),
    /// 数组: *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n
    Array(Vec<RespValue>),
    /// Null: $-1\r\n 或 *-1\r\n
    Null,
}

impl RespValue {
    /// 从命令参数创建 RESP 数组（全部编码为批量字符串）
    pub fn command<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        RespValue::Array(
            args.into_iter()
                .map(|s| RespValue::BulkString(Some(s.as_ref().as_bytes().to_vec())))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null | RespValue::BulkString(None))
    }

    /// 以 UTF-8 文本读取简单字符串或批量字符串
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) => Some(s.clone()),
            RespValue::BulkString(Some(bytes)) => String::from_utf8(bytes.clone()).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// RESP 解析错误
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Integer overflow")]
    IntegerOverflow,
    #[error("Frame too large: {0} bytes (max: {1} bytes)")]
    FrameTooLarge(usize, usize),
}
