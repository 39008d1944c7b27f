//! RESP 协议异步编码器

use super::RespValue;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// RESP 协议异步编码器
pub struct AsyncRespEncoder<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> AsyncRespEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// 编码 RESP 值，写入并 flush
    pub async fn encode(&mut self, value: &RespValue) -> std::io::Result<()> {
        let mut buf = Vec::new();
        write_value(&mut buf, value);
        self.writer.write_all(&buf).await?;
        self.writer.flush().await
    }

    /// 一次性写入多个值（MULTI/EXEC 流水线）
    pub async fn encode_all(&mut self, values: &[RespValue]) -> std::io::Result<()> {
        let mut buf = Vec::new();
        for value in values {
            write_value(&mut buf, value);
        }
        self.writer.write_all(&buf).await?;
        self.writer.flush().await
    }
}

fn write_value(buf: &mut Vec<u8>, value: &RespValue) {
    match value {
        RespValue::SimpleString(s) => {
            buf.extend_from_slice(format!("+{}\r\n", s).as_bytes());
        }
        RespValue::Error(e) => {
            buf.extend_from_slice(format!("-{}\r\n", e).as_bytes());
        }
        RespValue::Integer(i) => {
            buf.extend_from_slice(format!(":{}\r\n", i).as_bytes());
        }
        RespValue::BulkString(Some(bytes)) => {
            buf.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
            buf.extend_from_slice(bytes);
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(None) | RespValue::Null => {
            buf.extend_from_slice(b"$-1\r\n");
        }
        RespValue::Array(items) => {
            buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                write_value(buf, item);
            }
        }
    }
}
