// scripted_client.rs
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis_stream::{
    InfoKind, InfoRecord, Payload, ReadOptions, StreamClient, StreamCursors, StreamError,
    StreamReply, StreamResult, TransportError,
};

/// 按脚本返回 read_group 结果的客户端
///
/// 脚本耗尽后 read_group 返回 None（相当于阻塞超时）。
#[derive(Clone, Default)]
pub struct ScriptedClient {
    inner: Arc<ScriptedInner>,
}

#[derive(Default)]
struct ScriptedInner {
    replies: Mutex<VecDeque<StreamResult<Option<Vec<StreamReply>>>>>,
    reads: Mutex<Vec<ReadOptions>>,
    acked: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: Vec<StreamReply>) {
        self.inner.replies.lock().push_back(Ok(Some(reply)));
    }

    pub fn push_timeout(&self) {
        self.inner.replies.lock().push_back(Ok(None));
    }

    pub fn push_error(&self, error: TransportError) {
        self.inner
            .replies
            .lock()
            .push_back(Err(StreamError::Transport(error)));
    }

    /// 每次 read_group 收到的选项
    pub fn reads(&self) -> Vec<ReadOptions> {
        self.inner.reads.lock().clone()
    }

    pub fn acked(&self) -> Vec<(String, String, String)> {
        self.inner.acked.lock().clone()
    }
}

#[async_trait]
impl StreamClient for ScriptedClient {
    async fn add_entry(&self, _stream: &str, _fields: &Payload, _id: &str) -> StreamResult<String> {
        Ok("1-0".to_string())
    }

    async fn read_group(
        &self,
        _group: &str,
        _consumer: &str,
        _cursors: &StreamCursors,
        options: &ReadOptions,
    ) -> StreamResult<Option<Vec<StreamReply>>> {
        self.inner.reads.lock().push(options.clone());
        let next = self.inner.replies.lock().pop_front();
        match next {
            Some(reply) => reply,
            None => {
                tokio::task::yield_now().await;
                Ok(None)
            }
        }
    }

    async fn ack_entries(&self, stream: &str, group: &str, ids: &[&str]) -> StreamResult<u64> {
        let mut acked = self.inner.acked.lock();
        for id in ids {
            acked.push((stream.to_string(), group.to_string(), id.to_string()));
        }
        Ok(ids.len() as u64)
    }

    async fn delete_entries(&self, _stream: &str, ids: &[&str]) -> StreamResult<u64> {
        Ok(ids.len() as u64)
    }

    async fn create_group(
        &self,
        _stream: &str,
        _group: &str,
        _start: &str,
        _create_stream_if_missing: bool,
    ) -> StreamResult<()> {
        Ok(())
    }

    async fn destroy_group(&self, _stream: &str, _group: &str) -> StreamResult<u64> {
        Ok(0)
    }

    async fn delete_consumer(
        &self,
        _stream: &str,
        _group: &str,
        _consumer: &str,
    ) -> StreamResult<u64> {
        Ok(0)
    }

    async fn delete_stream(&self, _stream: &str) -> StreamResult<u64> {
        Ok(0)
    }

    async fn info(
        &self,
        _kind: InfoKind,
        _key: &str,
        _group: Option<&str>,
    ) -> StreamResult<Vec<InfoRecord>> {
        Ok(Vec::new())
    }
}
