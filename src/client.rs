//! 存储端能力接口
//!
//! Producer / GroupManager / Reader 只依赖 [`StreamClient`]，不关心线路格式。
//! 实现：[`crate::RespClient`]（TCP + RESP）、[`crate::MemoryStreamStore`]（进程内）。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::Payload;
use crate::error::StreamResult;
use crate::response::StreamReply;

/// 读取游标：只读取从未投递给该组的新条目
pub const NEW_ENTRIES: &str = ">";

/// 创建组的起点：只投递此后追加的条目
pub const LATEST_ID: &str = "$";

/// XINFO 返回的一条元数据记录
pub type InfoRecord = BTreeMap<String, String>;

/// 有序的 stream -> 游标 映射
///
/// 请求中 stream 的顺序决定回复中 stream 的顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCursors {
    cursors: Vec<(String, String)>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单个 stream，游标为 `>`
    pub fn new_entries(stream: impl Into<String>) -> Self {
        Self::new().with(stream, NEW_ENTRIES)
    }

    pub fn with(mut self, stream: impl Into<String>, cursor: impl Into<String>) -> Self {
        self.insert(stream, cursor);
        self
    }

    /// 插入或替换游标；替换时保留原位置
    pub fn insert(&mut self, stream: impl Into<String>, cursor: impl Into<String>) {
        let stream = stream.into();
        let cursor = cursor.into();
        match self.cursors.iter_mut().find(|(s, _)| *s == stream) {
            Some((_, c)) => *c = cursor,
            None => self.cursors.push((stream, cursor)),
        }
    }

    pub fn get(&self, stream: &str) -> Option<&str> {
        self.cursors
            .iter()
            .find(|(s, _)| s == stream)
            .map(|(_, c)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cursors.iter().map(|(s, c)| (s.as_str(), c.as_str()))
    }

    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.cursors.iter().map(|(s, _)| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// 是否所有游标都是 `>`
    pub fn only_new_entries(&self) -> bool {
        self.cursors.iter().all(|(_, c)| c == NEW_ENTRIES)
    }
}

impl<S, C> FromIterator<(S, C)> for StreamCursors
where
    S: Into<String>,
    C: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (S, C)>>(iter: T) -> Self {
        let mut cursors = StreamCursors::new();
        for (stream, cursor) in iter {
            cursors.insert(stream, cursor);
        }
        cursors
    }
}

/// XREADGROUP 选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// 无数据时的阻塞时间（毫秒），0 表示一直等待，None 表示不阻塞
    pub block: Option<u64>,
    /// 每个 stream 单次最多返回的条目数
    pub count: Option<usize>,
    /// 投递时不加入 pending 列表
    pub noack: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(mut self, ms: u64) -> Self {
        self.block = Some(ms);
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn noack(mut self) -> Self {
        self.noack = true;
        self
    }
}

/// XINFO 子命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    Stream,
    Groups,
    Consumers,
}

impl InfoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoKind::Stream => "STREAM",
            InfoKind::Groups => "GROUPS",
            InfoKind::Consumers => "CONSUMERS",
        }
    }
}

/// 带消费组的追加日志存储的原语操作
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// XADD：追加条目，返回存储端分配的 ID
    async fn add_entry(&self, stream: &str, fields: &Payload, id: &str) -> StreamResult<String>;

    /// XREADGROUP：阻塞读取，超时无数据时返回 None
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &StreamCursors,
        options: &ReadOptions,
    ) -> StreamResult<Option<Vec<StreamReply>>>;

    /// XACK：返回实际确认的数量
    async fn ack_entries(&self, stream: &str, group: &str, ids: &[&str]) -> StreamResult<u64>;

    /// XDEL：返回实际删除的数量
    async fn delete_entries(&self, stream: &str, ids: &[&str]) -> StreamResult<u64>;

    /// XGROUP CREATE
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream_if_missing: bool,
    ) -> StreamResult<()>;

    /// XGROUP DESTROY：返回被丢弃的 pending 条目数
    async fn destroy_group(&self, stream: &str, group: &str) -> StreamResult<u64>;

    /// XGROUP DELCONSUMER：返回该消费者持有的 pending 条目数
    async fn delete_consumer(&self, stream: &str, group: &str, consumer: &str)
    -> StreamResult<u64>;

    /// DEL
    async fn delete_stream(&self, stream: &str) -> StreamResult<u64>;

    /// XINFO
    async fn info(
        &self,
        kind: InfoKind,
        key: &str,
        group: Option<&str>,
    ) -> StreamResult<Vec<InfoRecord>>;
}

#[async_trait]
impl<T: StreamClient + ?Sized> StreamClient for Arc<T> {
    async fn add_entry(&self, stream: &str, fields: &Payload, id: &str) -> StreamResult<String> {
        (**self).add_entry(stream, fields, id).await
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &StreamCursors,
        options: &ReadOptions,
    ) -> StreamResult<Option<Vec<StreamReply>>> {
        (**self).read_group(group, consumer, cursors, options).await
    }

    async fn ack_entries(&self, stream: &str, group: &str, ids: &[&str]) -> StreamResult<u64> {
        (**self).ack_entries(stream, group, ids).await
    }

    async fn delete_entries(&self, stream: &str, ids: &[&str]) -> StreamResult<u64> {
        (**self).delete_entries(stream, ids).await
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream_if_missing: bool,
    ) -> StreamResult<()> {
        (**self)
            .create_group(stream, group, start, create_stream_if_missing)
            .await
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> StreamResult<u64> {
        (**self).destroy_group(stream, group).await
    }

    async fn delete_consumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> StreamResult<u64> {
        (**self).delete_consumer(stream, group, consumer).await
    }

    async fn delete_stream(&self, stream: &str) -> StreamResult<u64> {
        (**self).delete_stream(stream).await
    }

    async fn info(
        &self,
        kind: InfoKind,
        key: &str,
        group: Option<&str>,
    ) -> StreamResult<Vec<InfoRecord>> {
        (**self).info(kind, key, group).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursors_keep_order_and_replace_in_place() {
        let mut cursors = StreamCursors::new().with("b", ">").with("a", "0");
        cursors.insert("b", "5-0");

        let pairs: Vec<_> = cursors.iter().collect();
        assert_eq!(pairs, vec![("b", "5-0"), ("a", "0")]);
        assert_eq!(cursors.get("a"), Some("0"));
        assert!(!cursors.only_new_entries());
        assert!(StreamCursors::new_entries("s").only_new_entries());
    }

    #[test]
    fn test_cursors_from_iter() {
        let cursors: StreamCursors = [("s1", ">"), ("s2", ">")].into_iter().collect();
        assert_eq!(cursors.len(), 2);
        assert_eq!(cursors.streams().collect::<Vec<_>>(), vec!["s1", "s2"]);
    }
}
