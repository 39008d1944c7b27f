use tracing::debug;

use crate::client::StreamClient;
use crate::entry::Entry;
use crate::error::{StreamError, StreamResult};

/// 条目发布者
pub struct Producer<C> {
    client: C,
}

impl<C: StreamClient> Producer<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// 追加条目，返回带有存储端分配 ID 的新条目；传入的条目不会被修改
    pub async fn publish(&self, entry: &Entry) -> StreamResult<Entry> {
        if entry.payload().is_empty() {
            return Err(StreamError::Validation(format!(
                "entry for stream '{}' has an empty payload",
                entry.stream()
            )));
        }

        let id = self
            .client
            .add_entry(entry.stream(), entry.payload(), entry.id())
            .await?;
        debug!("Published {} to {}", id, entry.stream());
        Ok(entry.with_id(id))
    }

    /// 删除整个 stream；返回被删除的键数量
    pub async fn clear_stream(&self, stream: &str) -> StreamResult<u64> {
        self.client.delete_stream(stream).await
    }
}
