//! 内存 Stream 存储
//!
//! 进程内实现的 [`StreamClient`]，语义与 Redis Streams 一致：
//! 条目 ID、消费组、pending 列表、阻塞读取。不做持久化、裁剪和复制。

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::client::{InfoKind, InfoRecord, LATEST_ID, NEW_ENTRIES, ReadOptions, StreamClient, StreamCursors};
use crate::entry::{NEW_ENTRY_ID, Payload, StreamId};
use crate::error::{StreamError, StreamResult, TransportError};
use crate::response::{RawFields, RawRecord, StreamReply};

const ERR_KEY_REQUIRED: &str = "ERR The XGROUP subcommand requires the key to exist. Note that for CREATE you may want to use the MKSTREAM option to create an empty stream automatically.";
const ERR_BUSYGROUP: &str = "BUSYGROUP Consumer Group name already exists";
const ERR_ID_TOO_SMALL: &str =
    "ERR The ID specified in XADD is equal or smaller than the target stream top item";
const ERR_ID_EXHAUSTED: &str =
    "ERR The stream has exhausted the last possible ID, unable to add more items";
const ERR_INVALID_ID: &str = "ERR Invalid stream ID specified as stream command argument";

/// pending 列表中的一条记录
#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    delivery_count: u64,
}

#[derive(Debug, Clone)]
struct ConsumerState {
    seen_at: Instant,
}

#[derive(Debug, Clone)]
struct GroupState {
    last_delivered: StreamId,
    pending: BTreeMap<StreamId, PendingEntry>,
    consumers: BTreeMap<String, ConsumerState>,
}

impl GroupState {
    fn new(start: StreamId) -> Self {
        Self {
            last_delivered: start,
            pending: BTreeMap::new(),
            consumers: BTreeMap::new(),
        }
    }

    fn pending_of(&self, consumer: &str) -> usize {
        self.pending
            .values()
            .filter(|p| p.consumer == consumer)
            .count()
    }
}

#[derive(Debug, Clone, Default)]
struct StreamState {
    entries: BTreeMap<StreamId, Payload>,
    last_id: StreamId,
    groups: BTreeMap<String, GroupState>,
}

/// 内存 Stream 存储
///
/// `Clone` 得到的实例共享同一份数据。
#[derive(Clone)]
pub struct MemoryStreamStore {
    data: Arc<RwLock<HashMap<String, StreamState>>>,
    appended: Arc<Notify>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            appended: Arc::new(Notify::new()),
        }
    }

    /// 当前 stream 中的条目数；stream 不存在时返回 None
    pub fn stream_len(&self, stream: &str) -> Option<usize> {
        self.data.read().get(stream).map(|s| s.entries.len())
    }

    /// 某个组当前的 pending 条目数
    pub fn pending_count(&self, stream: &str, group: &str) -> Option<usize> {
        let data = self.data.read();
        data.get(stream)?.groups.get(group).map(|g| g.pending.len())
    }

    /// pending 条目被投递的次数
    pub fn delivery_count(&self, stream: &str, group: &str, id: &str) -> Option<u64> {
        let id: StreamId = id.parse().ok()?;
        let data = self.data.read();
        data.get(stream)?
            .groups
            .get(group)?
            .pending
            .get(&id)
            .map(|p| p.delivery_count)
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    fn server_error(message: &str) -> StreamError {
        StreamError::Transport(TransportError::Server(message.to_string()))
    }

    fn nogroup(stream: &str, group: &str) -> StreamError {
        StreamError::NoSuchStreamOrGroup(format!(
            "NOGROUP No such key '{}' or consumer group '{}'",
            stream, group
        ))
    }

    fn parse_id(id: &str) -> StreamResult<StreamId> {
        id.parse().map_err(|_| Self::server_error(ERR_INVALID_ID))
    }

    /// 非阻塞地执行一次组读取
    fn try_read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &StreamCursors,
        options: &ReadOptions,
    ) -> StreamResult<Vec<StreamReply>> {
        let mut data = self.data.write();
        let now = Instant::now();

        // 先校验所有 stream / group 存在，避免部分投递
        for (stream, cursor) in cursors.iter() {
            let exists = data
                .get(stream)
                .is_some_and(|s| s.groups.contains_key(group));
            if !exists {
                return Err(Self::nogroup(stream, group));
            }
            if cursor != NEW_ENTRIES {
                Self::parse_id(cursor)?;
            }
        }

        let limit = options.count.unwrap_or(usize::MAX);
        let mut replies = Vec::new();

        for (stream, cursor) in cursors.iter() {
            let Some(state) = data.get_mut(stream) else {
                continue;
            };
            let StreamState { entries, groups, .. } = state;
            let Some(group_state) = groups.get_mut(group) else {
                continue;
            };

            group_state
                .consumers
                .entry(consumer.to_string())
                .or_insert(ConsumerState { seen_at: now })
                .seen_at = now;

            let mut records = Vec::new();

            if cursor == NEW_ENTRIES {
                let range = (Bound::Excluded(group_state.last_delivered), Bound::Unbounded);
                for (id, payload) in entries.range(range).take(limit) {
                    records.push(RawRecord {
                        id: id.to_string(),
                        fields: Some(RawFields::Flat(flatten(payload))),
                    });
                    group_state.last_delivered = *id;
                    if !options.noack {
                        group_state.pending.insert(
                            *id,
                            PendingEntry {
                                consumer: consumer.to_string(),
                                delivery_count: 1,
                            },
                        );
                    }
                }
                if records.is_empty() {
                    continue;
                }
            } else {
                let after = Self::parse_id(cursor)?;
                let range = (Bound::Excluded(after), Bound::Unbounded);
                for (id, pending) in group_state
                    .pending
                    .range_mut(range)
                    .filter(|(_, p)| p.consumer == consumer)
                    .take(limit)
                {
                    pending.delivery_count += 1;
                    records.push(RawRecord {
                        id: id.to_string(),
                        fields: entries.get(id).map(|p| RawFields::Flat(flatten(p))),
                    });
                }
            }

            replies.push(StreamReply {
                stream: stream.to_string(),
                records,
            });
        }

        Ok(replies)
    }
}

impl Default for MemoryStreamStore {
    fn default() -> Self {
        Self::new()
    }
}

fn flatten(payload: &Payload) -> Vec<String> {
    payload
        .iter()
        .flat_map(|(k, v)| [k.clone(), v.clone()])
        .collect()
}

#[async_trait]
impl StreamClient for MemoryStreamStore {
    async fn add_entry(&self, stream: &str, fields: &Payload, id: &str) -> StreamResult<String> {
        if fields.is_empty() {
            return Err(Self::server_error(
                "ERR wrong number of arguments for 'xadd' command",
            ));
        }

        let new_id = {
            let mut data = self.data.write();
            let state = data.entry(stream.to_string()).or_default();

            let new_id = if id == NEW_ENTRY_ID {
                state
                    .last_id
                    .next_after(Self::now_ms())
                    .ok_or_else(|| Self::server_error(ERR_ID_EXHAUSTED))?
            } else {
                let explicit = Self::parse_id(id)?;
                if explicit <= state.last_id {
                    return Err(Self::server_error(ERR_ID_TOO_SMALL));
                }
                explicit
            };

            state.entries.insert(new_id, fields.clone());
            state.last_id = new_id;
            new_id
        };

        self.appended.notify_waiters();
        debug!("Appended entry {} to stream {}", new_id, stream);
        Ok(new_id.to_string())
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &StreamCursors,
        options: &ReadOptions,
    ) -> StreamResult<Option<Vec<StreamReply>>> {
        // 只有全部是 `>` 游标时才阻塞
        let deadline = match options.block {
            Some(ms) if cursors.only_new_entries() => Some(if ms == 0 {
                None
            } else {
                Some(Instant::now() + Duration::from_millis(ms))
            }),
            _ => None,
        };

        loop {
            // 先注册等待，再检查数据，避免丢失唤醒
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let replies = self.try_read_group(group, consumer, cursors, options)?;
            if !replies.is_empty() {
                return Ok(Some(replies));
            }

            match deadline {
                None => return Ok(None),
                Some(None) => notified.await,
                Some(Some(deadline)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero()
                        || tokio::time::timeout(remaining, notified).await.is_err()
                    {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn ack_entries(&self, stream: &str, group: &str, ids: &[&str]) -> StreamResult<u64> {
        let ids = ids
            .iter()
            .map(|id| Self::parse_id(id))
            .collect::<StreamResult<Vec<_>>>()?;

        let mut data = self.data.write();
        let Some(group_state) = data.get_mut(stream).and_then(|s| s.groups.get_mut(group)) else {
            return Ok(0);
        };

        let acked = ids
            .iter()
            .filter(|id| group_state.pending.remove(*id).is_some())
            .count();
        Ok(acked as u64)
    }

    async fn delete_entries(&self, stream: &str, ids: &[&str]) -> StreamResult<u64> {
        let ids = ids
            .iter()
            .map(|id| Self::parse_id(id))
            .collect::<StreamResult<Vec<_>>>()?;

        let mut data = self.data.write();
        let Some(state) = data.get_mut(stream) else {
            return Ok(0);
        };

        let deleted = ids
            .iter()
            .filter(|id| state.entries.remove(*id).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream_if_missing: bool,
    ) -> StreamResult<()> {
        let mut data = self.data.write();

        if !data.contains_key(stream) {
            if !create_stream_if_missing {
                return Err(StreamError::NoSuchStreamOrGroup(ERR_KEY_REQUIRED.to_string()));
            }
            data.insert(stream.to_string(), StreamState::default());
        }

        let state = data
            .get_mut(stream)
            .ok_or_else(|| StreamError::NoSuchStreamOrGroup(ERR_KEY_REQUIRED.to_string()))?;

        if state.groups.contains_key(group) {
            return Err(StreamError::from_server_message(ERR_BUSYGROUP, Some(group), stream));
        }

        let start = if start == LATEST_ID {
            state.last_id
        } else {
            Self::parse_id(start)?
        };

        state.groups.insert(group.to_string(), GroupState::new(start));
        info!("Created group {} on stream {} at {}", group, stream, start);
        Ok(())
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> StreamResult<u64> {
        let mut data = self.data.write();
        let state = data
            .get_mut(stream)
            .ok_or_else(|| StreamError::NoSuchStreamOrGroup(ERR_KEY_REQUIRED.to_string()))?;

        match state.groups.remove(group) {
            Some(removed) => {
                info!(
                    "Destroyed group {} on stream {} ({} pending)",
                    group,
                    stream,
                    removed.pending.len()
                );
                Ok(removed.pending.len() as u64)
            }
            None => Ok(0),
        }
    }

    async fn delete_consumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> StreamResult<u64> {
        let mut data = self.data.write();
        let group_state = data
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| Self::nogroup(stream, group))?;

        if group_state.consumers.remove(consumer).is_none() {
            return Ok(0);
        }

        let before = group_state.pending.len();
        group_state.pending.retain(|_, p| p.consumer != consumer);
        Ok((before - group_state.pending.len()) as u64)
    }

    async fn delete_stream(&self, stream: &str) -> StreamResult<u64> {
        let removed = self.data.write().remove(stream).is_some();
        Ok(removed as u64)
    }

    async fn info(
        &self,
        kind: InfoKind,
        key: &str,
        group: Option<&str>,
    ) -> StreamResult<Vec<InfoRecord>> {
        let data = self.data.read();
        let state = data
            .get(key)
            .ok_or_else(|| StreamError::NoSuchStreamOrGroup("ERR no such key".to_string()))?;

        let records = match kind {
            InfoKind::Stream => {
                let mut record = InfoRecord::new();
                record.insert("length".into(), state.entries.len().to_string());
                record.insert("groups".into(), state.groups.len().to_string());
                record.insert("last-generated-id".into(), state.last_id.to_string());
                if let Some((id, _)) = state.entries.first_key_value() {
                    record.insert("first-entry".into(), id.to_string());
                }
                if let Some((id, _)) = state.entries.last_key_value() {
                    record.insert("last-entry".into(), id.to_string());
                }
                vec![record]
            }
            InfoKind::Groups => state
                .groups
                .iter()
                .map(|(name, g)| {
                    let mut record = InfoRecord::new();
                    record.insert("name".into(), name.clone());
                    record.insert("consumers".into(), g.consumers.len().to_string());
                    record.insert("pending".into(), g.pending.len().to_string());
                    record.insert("last-delivered-id".into(), g.last_delivered.to_string());
                    record
                })
                .collect(),
            InfoKind::Consumers => {
                let group_name = group.unwrap_or_default();
                let g = state
                    .groups
                    .get(group_name)
                    .ok_or_else(|| Self::nogroup(key, group_name))?;
                let now = Instant::now();
                g.consumers
                    .iter()
                    .map(|(name, c)| {
                        let mut record = InfoRecord::new();
                        record.insert("name".into(), name.clone());
                        record.insert("pending".into(), g.pending_of(name).to_string());
                        record.insert(
                            "idle".into(),
                            now.duration_since(c.seen_at).as_millis().to_string(),
                        );
                        record
                    })
                    .collect()
            }
        };

        Ok(records)
    }
}
