//! 消费组读取器
//!
//! [`Reader`] 持有监听状态机：`Idle` -> `Listening` -> `Idle`。
//! 同一实例同时只允许一个 [`Reader::listen`] 循环；循环在两次拉取之间
//! 检查停止标志，不会中断正在进行的阻塞读取。

use std::future::Future;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::client::{ReadOptions, StreamClient, StreamCursors};
use crate::config::ReaderConfig;
use crate::entry::Entry;
use crate::error::{StreamError, StreamResult};
use crate::response::parse_read_response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Idle,
    Listening { stop_requested: bool },
}

/// 退出监听循环时（包括出错和 future 被丢弃）把状态复位为 Idle
struct ListeningGuard<'a> {
    state: &'a Mutex<ReaderState>,
}

impl Drop for ListeningGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = ReaderState::Idle;
    }
}

/// 消费组读取器
pub struct Reader<C> {
    client: C,
    config: ReaderConfig,
    state: Mutex<ReaderState>,
}

impl<C: StreamClient> Reader<C> {
    pub fn new(client: C) -> Self {
        Self::with_config(client, ReaderConfig::default())
    }

    pub fn with_config(client: C, config: ReaderConfig) -> Self {
        Self {
            client,
            config,
            state: Mutex::new(ReaderState::Idle),
        }
    }

    pub fn is_listening(&self) -> bool {
        matches!(*self.state.lock(), ReaderState::Listening { .. })
    }

    /// 持续拉取并把每个条目交给 `on_entry`，直到 [`Reader::stop`] 被调用
    ///
    /// - 已在监听时返回 [`StreamError::AlreadyListening`]，状态不变
    /// - `options.block` 未设置时使用 `read_timeout_ms`
    /// - 条目按解析顺序逐个回调，回调完成后才处理下一个
    /// - 停止请求在当前批次处理完后生效
    /// - 客户端或回调返回的错误会终止循环，状态复位为 Idle
    pub async fn listen<F, Fut>(
        &self,
        group: &str,
        consumer: &str,
        cursors: &StreamCursors,
        options: ReadOptions,
        mut on_entry: F,
    ) -> StreamResult<()>
    where
        F: FnMut(Entry) -> Fut,
        Fut: Future<Output = StreamResult<()>>,
    {
        let _guard = self.begin_listening()?;
        let options = self.effective_options(options);
        info!(
            "Listening on {:?} as {}/{} (block {:?}ms)",
            cursors.streams().collect::<Vec<_>>(),
            group,
            consumer,
            options.block
        );

        while !self.stop_requested() {
            let entries = match self.fetch(group, consumer, cursors, &options).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Listen loop for {}/{} stopped: {}", group, consumer, e);
                    return Err(e);
                }
            };

            for entry in entries {
                on_entry(entry).await?;
            }
        }

        info!("Stopped listening as {}/{}", group, consumer);
        Ok(())
    }

    /// 请求停止监听；未在监听时无操作
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let ReaderState::Listening { stop_requested } = &mut *state {
            *stop_requested = true;
        }
    }

    /// 单次读取，不读写监听状态；超时无数据时返回空序列
    pub async fn read(
        &self,
        group: &str,
        consumer: &str,
        cursors: &StreamCursors,
        options: ReadOptions,
    ) -> StreamResult<Vec<Entry>> {
        let options = self.effective_options(options);
        self.fetch(group, consumer, cursors, &options).await
    }

    /// 确认条目；已确认或不在 pending 列表中时返回 0
    pub async fn ack(&self, group: &str, entry: &Entry) -> StreamResult<u64> {
        self.client
            .ack_entries(entry.stream(), group, &[entry.id()])
            .await
    }

    /// 从 stream 中永久删除条目；条目不存在时返回 0
    pub async fn delete(&self, entry: &Entry) -> StreamResult<u64> {
        self.client
            .delete_entries(entry.stream(), &[entry.id()])
            .await
    }

    fn begin_listening(&self) -> StreamResult<ListeningGuard<'_>> {
        let mut state = self.state.lock();
        if *state != ReaderState::Idle {
            return Err(StreamError::AlreadyListening);
        }
        *state = ReaderState::Listening {
            stop_requested: false,
        };
        Ok(ListeningGuard { state: &self.state })
    }

    fn stop_requested(&self) -> bool {
        !matches!(
            *self.state.lock(),
            ReaderState::Listening {
                stop_requested: false
            }
        )
    }

    fn effective_options(&self, mut options: ReadOptions) -> ReadOptions {
        options.block.get_or_insert(self.config.read_timeout_ms);
        options
    }

    async fn fetch(
        &self,
        group: &str,
        consumer: &str,
        cursors: &StreamCursors,
        options: &ReadOptions,
    ) -> StreamResult<Vec<Entry>> {
        let reply = self
            .client
            .read_group(group, consumer, cursors, options)
            .await?;
        let entries = match reply {
            Some(reply) => parse_read_response(reply)?,
            None => Vec::new(),
        };
        debug!("Fetched {} entries for {}/{}", entries.len(), group, consumer);
        Ok(entries)
    }
}
