//! redis-stream - 基于消费组的追加日志客户端
//!
//! 面向 Redis Streams 风格的存储：
//! - [`Producer`]: 追加条目，返回带有存储端 ID 的新条目
//! - [`GroupManager`]: 创建 / 销毁消费组，移除消费者，查询元数据
//! - [`Reader`]: 阻塞拉取循环（listen / stop）、单次读取、ack / delete
//!
//! 存储端通过 [`StreamClient`] 访问，内置两种实现：
//! - [`RespClient`]: TCP + RESP 协议
//! - [`MemoryStreamStore`]: 进程内存储
//!
//! # 示例
//! ```rust,no_run
//! use redis_stream::{Entry, GroupManager, MemoryStreamStore, Producer, ReadOptions, Reader, StreamCursors};
//!
//! # async fn demo() -> redis_stream::StreamResult<()> {
//! let store = MemoryStreamStore::new();
//! GroupManager::new(store.clone()).create_group("g", "s").await?;
//! Producer::new(store.clone()).publish(&Entry::new("s", [("foo", "bar")])).await?;
//!
//! let reader = Reader::new(store);
//! let entries = reader
//!     .read("g", "c1", &StreamCursors::new_entries("s"), ReadOptions::new())
//!     .await?;
//! for entry in &entries {
//!     reader.ack("g", entry).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod entry;
pub mod error;
pub mod group;
pub mod memory;
pub mod producer;
pub mod reader;
pub mod resp;
pub mod response;

pub use client::{
    InfoKind, InfoRecord, LATEST_ID, NEW_ENTRIES, ReadOptions, StreamClient, StreamCursors,
};
pub use config::{ConnectionConfig, ReaderConfig};
pub use connection::RespClient;
pub use entry::{Entry, NEW_ENTRY_ID, Payload, StreamId};
pub use error::{StreamError, StreamResult, TransportError};
pub use group::GroupManager;
pub use memory::MemoryStreamStore;
pub use producer::Producer;
pub use reader::Reader;
pub use response::{RawFields, RawRecord, StreamReply, parse_read_response};
