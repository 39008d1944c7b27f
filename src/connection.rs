//! 基于 RESP 的 Stream 客户端
//!
//! 一个 [`RespClient`] 对应一条连接。连接由 `tokio::sync::Mutex` 保护，
//! 同一客户端上的调用串行执行：阻塞读取期间连接一直被占用。
//! 不做重连，连接断开后的调用返回传输错误。请求被取消（future 在读回回复前被丢弃）
//! 或回复解析失败后，连接上的帧不再对齐，此后的调用一律返回 [`TransportError::Closed`]。

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf, split};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{InfoKind, InfoRecord, ReadOptions, StreamClient, StreamCursors};
use crate::config::ConnectionConfig;
use crate::entry::Payload;
use crate::error::{StreamError, StreamResult, TransportError};
use crate::resp::{AsyncRespEncoder, AsyncRespParser, RespValue};
use crate::response::{RawFields, RawRecord, StreamReply};

struct Connection<T> {
    parser: AsyncRespParser<ReadHalf<T>>,
    encoder: AsyncRespEncoder<WriteHalf<T>>,
    /// 命令已写出但回复尚未完整读回；为 true 时连接上的帧已无法对齐
    in_flight: bool,
}

impl<T> Connection<T> {
    /// 开始一次请求；上一次请求被中途放弃或出错时连接不可再用
    fn begin(&mut self, peer: &str) -> StreamResult<()> {
        if self.in_flight {
            warn!("Connection to {} is out of sync, refusing request", peer);
            return Err(TransportError::Closed.into());
        }
        self.in_flight = true;
        Ok(())
    }
}

/// RESP 协议的 Stream 客户端
pub struct RespClient<T = TcpStream> {
    conn: Mutex<Connection<T>>,
    peer: String,
}

impl RespClient<TcpStream> {
    /// 建立 TCP 连接；`database` 非 0 时执行 SELECT
    pub async fn connect(config: &ConnectionConfig) -> StreamResult<Self> {
        let stream = tokio::time::timeout(
            config.connect_timeout(),
            TcpStream::connect(&config.addr),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;
        stream.set_nodelay(true)?;

        let client = Self::from_stream(stream, config.addr.clone(), config.max_frame_size);
        if config.database != 0 {
            let reply = client
                .request(vec!["SELECT".to_string(), config.database.to_string()])
                .await?;
            check(reply, None, "")?;
        }

        info!("Connected to {} (db {})", config.addr, config.database);
        Ok(client)
    }
}

impl<T> RespClient<T>
where
    T: AsyncRead + AsyncWrite + Send,
{
    /// 在已建立的双向流上创建客户端
    pub fn from_stream(stream: T, peer: impl Into<String>, max_frame_size: usize) -> Self {
        let (reader, writer) = split(stream);
        Self {
            conn: Mutex::new(Connection {
                parser: AsyncRespParser::with_max_bytes(reader, max_frame_size),
                encoder: AsyncRespEncoder::new(writer),
                in_flight: false,
            }),
            peer: peer.into(),
        }
    }

    /// 发送一条命令并读取回复；错误回复以 `RespValue::Error` 原样返回
    async fn request(&self, args: Vec<String>) -> StreamResult<RespValue> {
        let command = RespValue::command(&args);
        let mut conn = self.conn.lock().await;
        conn.begin(&self.peer)?;
        debug!("-> {} {}", self.peer, args.first().map(String::as_str).unwrap_or(""));
        conn.encoder.encode(&command).await?;
        let reply = conn.parser.read_reply().await?;
        conn.in_flight = false;
        Ok(reply)
    }

    /// MULTI / EXEC 事务，返回各命令的结果
    async fn transaction(
        &self,
        commands: Vec<Vec<String>>,
        group: Option<&str>,
        stream: &str,
    ) -> StreamResult<Vec<RespValue>> {
        let mut frames = Vec::with_capacity(commands.len() + 2);
        frames.push(RespValue::command(["MULTI"]));
        frames.extend(commands.iter().map(|c| RespValue::command(c)));
        frames.push(RespValue::command(["EXEC"]));

        let mut conn = self.conn.lock().await;
        conn.begin(&self.peer)?;
        debug!("-> {} MULTI ({} commands)", self.peer, commands.len());
        conn.encoder.encode_all(&frames).await?;

        let mut queue_error = None;
        for _ in 0..commands.len() + 1 {
            if let RespValue::Error(msg) = conn.parser.read_reply().await? {
                queue_error.get_or_insert(msg);
            }
        }
        let exec = conn.parser.read_reply().await?;
        conn.in_flight = false;
        drop(conn);

        match exec {
            RespValue::Array(results) => Ok(results),
            RespValue::Error(msg) => Err(StreamError::from_server_message(
                queue_error.as_deref().unwrap_or(&msg),
                group,
                stream,
            )),
            other => Err(StreamError::unexpected(format!(
                "EXEC returned {:?}",
                other
            ))),
        }
    }
}

/// 将错误回复归类为 [`StreamError`]
fn check(reply: RespValue, group: Option<&str>, stream: &str) -> StreamResult<RespValue> {
    match reply {
        RespValue::Error(msg) => Err(StreamError::from_server_message(&msg, group, stream)),
        other => Ok(other),
    }
}

fn expect_count(reply: RespValue, what: &str) -> StreamResult<u64> {
    match reply.as_integer() {
        Some(n) if n >= 0 => Ok(n as u64),
        _ => Err(StreamError::unexpected(format!(
            "{} returned {:?}",
            what, reply
        ))),
    }
}

fn expect_text(value: &RespValue, what: &str) -> StreamResult<String> {
    value.as_text().ok_or_else(|| {
        StreamError::unexpected(format!("{}: expected UTF-8 string, got {:?}", what, value))
    })
}

/// 解码 XREADGROUP 回复: [[stream, [[id, [k, v, ...] | nil], ...]], ...]
fn decode_read_reply(reply: RespValue) -> StreamResult<Option<Vec<StreamReply>>> {
    if reply.is_null() {
        return Ok(None);
    }
    let streams = match reply {
        RespValue::Array(streams) if streams.is_empty() => return Ok(None),
        RespValue::Array(streams) => streams,
        other => {
            return Err(StreamError::unexpected(format!(
                "XREADGROUP returned {:?}",
                other
            )));
        }
    };

    let mut replies = Vec::with_capacity(streams.len());
    for item in streams {
        let RespValue::Array(pair) = item else {
            return Err(StreamError::unexpected("XREADGROUP stream item is not an array"));
        };
        let [name, records] = <[RespValue; 2]>::try_from(pair).map_err(|_| {
            StreamError::unexpected("XREADGROUP stream item must have 2 elements")
        })?;

        let stream = expect_text(&name, "stream name")?;
        let records = match records {
            RespValue::Array(records) => records,
            RespValue::Null => Vec::new(),
            other => {
                return Err(StreamError::unexpected(format!(
                    "records of stream '{}' are {:?}",
                    stream, other
                )));
            }
        };

        let mut raw = Vec::with_capacity(records.len());
        for record in records {
            let RespValue::Array(parts) = record else {
                return Err(StreamError::unexpected("stream record is not an array"));
            };
            let [id, fields] = <[RespValue; 2]>::try_from(parts)
                .map_err(|_| StreamError::unexpected("stream record must have 2 elements"))?;

            let id = expect_text(&id, "entry id")?;
            let fields = match fields {
                RespValue::Array(items) => Some(RawFields::Flat(
                    items
                        .iter()
                        .map(|item| expect_text(item, "entry field"))
                        .collect::<StreamResult<Vec<_>>>()?,
                )),
                value if value.is_null() => None,
                other => {
                    return Err(StreamError::unexpected(format!(
                        "fields of entry '{}' are {:?}",
                        id, other
                    )));
                }
            };
            raw.push(RawRecord { id, fields });
        }

        replies.push(StreamReply {
            stream,
            records: raw,
        });
    }

    Ok(Some(replies))
}

/// 将 XINFO 的扁平键值数组转为记录；嵌套的条目只保留其 ID
fn decode_info_record(items: Vec<RespValue>) -> StreamResult<InfoRecord> {
    if items.len() % 2 != 0 {
        return Err(StreamError::unexpected("XINFO reply has odd length"));
    }

    let mut record = InfoRecord::new();
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        let key = expect_text(&key, "XINFO field")?;
        let value = match value {
            RespValue::Integer(i) => Some(i.to_string()),
            RespValue::Array(entry) => entry.first().and_then(RespValue::as_text),
            other => other.as_text(),
        };
        if let Some(value) = value {
            record.insert(key, value);
        }
    }
    Ok(record)
}

#[async_trait]
impl<T> StreamClient for RespClient<T>
where
    T: AsyncRead + AsyncWrite + Send,
{
    async fn add_entry(&self, stream: &str, fields: &Payload, id: &str) -> StreamResult<String> {
        let mut args = Vec::with_capacity(3 + fields.len() * 2);
        args.extend(["XADD".to_string(), stream.to_string(), id.to_string()]);
        for (k, v) in fields {
            args.push(k.clone());
            args.push(v.clone());
        }

        let reply = check(self.request(args).await?, None, stream)?;
        expect_text(&reply, "XADD")
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &StreamCursors,
        options: &ReadOptions,
    ) -> StreamResult<Option<Vec<StreamReply>>> {
        let mut args = vec![
            "XREADGROUP".to_string(),
            "GROUP".to_string(),
            group.to_string(),
            consumer.to_string(),
        ];
        if let Some(count) = options.count {
            args.extend(["COUNT".to_string(), count.to_string()]);
        }
        if let Some(block) = options.block {
            args.extend(["BLOCK".to_string(), block.to_string()]);
        }
        if options.noack {
            args.push("NOACK".to_string());
        }
        args.push("STREAMS".to_string());
        args.extend(cursors.streams().map(str::to_string));
        args.extend(cursors.iter().map(|(_, c)| c.to_string()));

        let first = cursors.streams().next().unwrap_or_default().to_string();
        let reply = check(self.request(args).await?, Some(group), &first)?;
        decode_read_reply(reply)
    }

    async fn ack_entries(&self, stream: &str, group: &str, ids: &[&str]) -> StreamResult<u64> {
        let mut args = vec!["XACK".to_string(), stream.to_string(), group.to_string()];
        args.extend(ids.iter().map(|id| id.to_string()));
        let reply = check(self.request(args).await?, Some(group), stream)?;
        expect_count(reply, "XACK")
    }

    async fn delete_entries(&self, stream: &str, ids: &[&str]) -> StreamResult<u64> {
        let mut args = vec!["XDEL".to_string(), stream.to_string()];
        args.extend(ids.iter().map(|id| id.to_string()));
        let reply = check(self.request(args).await?, None, stream)?;
        expect_count(reply, "XDEL")
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream_if_missing: bool,
    ) -> StreamResult<()> {
        let mut args = vec![
            "XGROUP".to_string(),
            "CREATE".to_string(),
            stream.to_string(),
            group.to_string(),
            start.to_string(),
        ];
        if create_stream_if_missing {
            args.push("MKSTREAM".to_string());
        }
        check(self.request(args).await?, Some(group), stream)?;
        Ok(())
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> StreamResult<u64> {
        let results = self
            .transaction(
                vec![
                    vec!["XPENDING".to_string(), stream.to_string(), group.to_string()],
                    vec![
                        "XGROUP".to_string(),
                        "DESTROY".to_string(),
                        stream.to_string(),
                        group.to_string(),
                    ],
                ],
                Some(group),
                stream,
            )
            .await?;

        let [pending, destroyed] = <[RespValue; 2]>::try_from(results)
            .map_err(|_| StreamError::unexpected("EXEC must return 2 results"))?;

        let destroyed = expect_count(check(destroyed, Some(group), stream)?, "XGROUP DESTROY")?;
        if destroyed == 0 {
            return Ok(0);
        }

        // XPENDING 摘要: [count, min-id, max-id, [[consumer, count], ...]]
        let pending = match pending {
            RespValue::Array(summary) => summary.first().and_then(RespValue::as_integer),
            _ => None,
        };
        Ok(pending.unwrap_or(0).max(0) as u64)
    }

    async fn delete_consumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> StreamResult<u64> {
        let args = vec![
            "XGROUP".to_string(),
            "DELCONSUMER".to_string(),
            stream.to_string(),
            group.to_string(),
            consumer.to_string(),
        ];
        let reply = check(self.request(args).await?, Some(group), stream)?;
        expect_count(reply, "XGROUP DELCONSUMER")
    }

    async fn delete_stream(&self, stream: &str) -> StreamResult<u64> {
        let reply = check(
            self.request(vec!["DEL".to_string(), stream.to_string()]).await?,
            None,
            stream,
        )?;
        expect_count(reply, "DEL")
    }

    async fn info(
        &self,
        kind: InfoKind,
        key: &str,
        group: Option<&str>,
    ) -> StreamResult<Vec<InfoRecord>> {
        let mut args = vec![
            "XINFO".to_string(),
            kind.as_str().to_string(),
            key.to_string(),
        ];
        if let (InfoKind::Consumers, Some(group)) = (kind, group) {
            args.push(group.to_string());
        }

        let reply = check(self.request(args).await?, group, key)?;
        let RespValue::Array(items) = reply else {
            return Err(StreamError::unexpected(format!("XINFO returned {:?}", reply)));
        };

        match kind {
            InfoKind::Stream => Ok(vec![decode_info_record(items)?]),
            InfoKind::Groups | InfoKind::Consumers => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Array(fields) => decode_info_record(fields),
                    other => Err(StreamError::unexpected(format!(
                        "XINFO item is {:?}",
                        other
                    ))),
                })
                .collect(),
        }
    }
}
