//! RESP 协议异步解析器

use super::{RespError, RespValue};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// 默认最大帧大小：512MB
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// 单个数组允许的最大元素数
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// RESP 协议异步解析器
pub struct AsyncRespParser<R> {
    reader: BufReader<R>,
    max_bytes: usize,
    bytes_read: usize,
}

impl<R: AsyncRead + Unpin> AsyncRespParser<R> {
    /// 创建新的异步解析器（使用默认最大帧大小）
    pub fn new(reader: R) -> Self {
        Self::with_max_bytes(reader, DEFAULT_MAX_FRAME_SIZE)
    }

    /// 创建新的异步解析器（指定最大帧大小）
    pub fn with_max_bytes(reader: R, max_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_bytes,
            bytes_read: 0,
        }
    }

    /// 检查并更新已读取字节数
    fn check_frame_size(&mut self, additional: usize) -> Result<(), RespError> {
        self.bytes_read = self.bytes_read.saturating_add(additional);
        if self.bytes_read > self.max_bytes {
            Err(RespError::FrameTooLarge(self.bytes_read, self.max_bytes))
        } else {
            Ok(())
        }
    }

    /// 读取一个完整的回复帧，帧大小从零开始计数
    pub async fn read_reply(&mut self) -> Result<RespValue, RespError> {
        self.bytes_read = 0;
        self.parse().await
    }

    /// 解析下一个 RESP 值
    pub async fn parse(&mut self) -> Result<RespValue, RespError> {
        let header = self.read_header().await?;
        let (prefix, body) = header.split_at(1);

        match prefix {
            "+" => Ok(RespValue::SimpleString(body.to_string())),
            "-" => Ok(RespValue::Error(body.to_string())),
            ":" => parse_integer(body).map(RespValue::Integer),
            "$" => match parse_length(body, "bulk string")? {
                Some(len) => self.read_bulk(len).await,
                None => Ok(RespValue::Null),
            },
            "*" => match parse_length(body, "array")? {
                Some(count) => self.read_array(count).await,
                None => Ok(RespValue::Null),
            },
            other => Err(RespError::InvalidFormat(format!(
                "Unknown RESP type: {}",
                other
            ))),
        }
    }

    /// 读取一行帧头（去掉 CRLF），计入帧大小
    async fn read_header(&mut self) -> Result<String, RespError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(RespError::UnexpectedEof);
        }
        self.check_frame_size(n)?;

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Err(RespError::InvalidFormat("Empty line".to_string()));
        }
        if !trimmed.is_char_boundary(1) {
            return Err(RespError::InvalidFormat(format!(
                "Unknown RESP type in line: {}",
                trimmed
            )));
        }
        Ok(trimmed.to_string())
    }

    async fn read_bulk(&mut self, len: usize) -> Result<RespValue, RespError> {
        // 数据 + CRLF
        self.check_frame_size(len.saturating_add(2))?;

        let mut data = vec![0u8; len + 2];
        self.reader.read_exact(&mut data).await?;
        if !data.ends_with(b"\r\n") {
            return Err(RespError::InvalidFormat(
                "Expected \\r\\n after bulk string".to_string(),
            ));
        }
        data.truncate(len);
        Ok(RespValue::BulkString(Some(data)))
    }

    async fn read_array(&mut self, count: usize) -> Result<RespValue, RespError> {
        if count > MAX_ARRAY_LEN {
            return Err(RespError::InvalidFormat(format!(
                "Array too large: {} elements",
                count
            )));
        }

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(Box::pin(self.parse()).await?);
        }
        Ok(RespValue::Array(items))
    }
}

fn parse_integer(text: &str) -> Result<i64, RespError> {
    let wide = text
        .parse::<i128>()
        .map_err(|_| RespError::InvalidFormat(format!("Invalid integer: {}", text)))?;
    i64::try_from(wide).map_err(|_| RespError::IntegerOverflow)
}

/// `-1` 表示 Null，返回 None
fn parse_length(text: &str, what: &str) -> Result<Option<usize>, RespError> {
    let invalid = || RespError::InvalidFormat(format!("Invalid {} length: {}", what, text));
    match text.parse::<i64>().map_err(|_| invalid())? {
        -1 => Ok(None),
        n => usize::try_from(n).map(Some).map_err(|_| invalid()),
    }
}
