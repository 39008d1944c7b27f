//! 消费组生命周期管理

use tracing::info;

use crate::client::{InfoKind, InfoRecord, LATEST_ID, StreamClient};
use crate::error::StreamResult;

/// 消费组管理
pub struct GroupManager<C> {
    client: C,
}

impl<C: StreamClient> GroupManager<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// 创建消费组：从 `$` 开始，stream 不存在时自动创建
    ///
    /// 组已存在时返回 [`StreamError::GroupAlreadyExists`](crate::StreamError::GroupAlreadyExists)。
    pub async fn create_group(&self, group: &str, stream: &str) -> StreamResult<()> {
        self.create_group_from(group, stream, LATEST_ID, true).await
    }

    /// 创建消费组
    ///
    /// - `start`: `$` 只投递此后追加的条目；`0` 或具体 ID 从该位置之后开始投递
    /// - `create_stream_if_missing`: stream 不存在时是否自动创建（MKSTREAM）
    pub async fn create_group_from(
        &self,
        group: &str,
        stream: &str,
        start: &str,
        create_stream_if_missing: bool,
    ) -> StreamResult<()> {
        self.client
            .create_group(stream, group, start, create_stream_if_missing)
            .await?;
        info!("Consumer group {} created on {} (start {})", group, stream, start);
        Ok(())
    }

    /// 销毁消费组，返回被丢弃的 pending 条目数
    ///
    /// stream 不存在时返回 [`StreamError::NoSuchStreamOrGroup`](crate::StreamError::NoSuchStreamOrGroup)；
    /// 组不存在时返回 0。
    pub async fn delete_group(&self, group: &str, stream: &str) -> StreamResult<u64> {
        let discarded = self.client.destroy_group(stream, group).await?;
        info!(
            "Consumer group {} deleted from {} ({} pending discarded)",
            group, stream, discarded
        );
        Ok(discarded)
    }

    /// 从组中移除一个消费者，返回它持有的 pending 条目数
    pub async fn remove_consumer(
        &self,
        group: &str,
        stream: &str,
        consumer: &str,
    ) -> StreamResult<u64> {
        let pending = self.client.delete_consumer(stream, group, consumer).await?;
        info!(
            "Consumer {} removed from group {} on {} ({} pending)",
            consumer, group, stream, pending
        );
        Ok(pending)
    }

    pub async fn info(
        &self,
        kind: InfoKind,
        key: &str,
        group: Option<&str>,
    ) -> StreamResult<Vec<InfoRecord>> {
        self.client.info(kind, key, group).await
    }

    pub async fn stream_info(&self, stream: &str) -> StreamResult<InfoRecord> {
        let mut records = self.client.info(InfoKind::Stream, stream, None).await?;
        Ok(records.pop().unwrap_or_default())
    }

    pub async fn groups(&self, stream: &str) -> StreamResult<Vec<InfoRecord>> {
        self.client.info(InfoKind::Groups, stream, None).await
    }

    pub async fn consumers(&self, group: &str, stream: &str) -> StreamResult<Vec<InfoRecord>> {
        self.client
            .info(InfoKind::Consumers, stream, Some(group))
            .await
    }
}
