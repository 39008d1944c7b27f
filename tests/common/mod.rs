// common/mod.rs
pub mod scripted_client;

use redis_stream::{GroupManager, MemoryStreamStore, Producer, Reader, ReaderConfig};

/// 一组共享同一个内存存储的 Producer / GroupManager / Reader
pub struct TestStreams {
    pub store: MemoryStreamStore,
    pub producer: Producer<MemoryStreamStore>,
    pub groups: GroupManager<MemoryStreamStore>,
    pub reader: Reader<MemoryStreamStore>,
}

impl TestStreams {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        let store = MemoryStreamStore::new();
        Self {
            producer: Producer::new(store.clone()),
            groups: GroupManager::new(store.clone()),
            reader: Reader::with_config(
                store.clone(),
                ReaderConfig {
                    read_timeout_ms: 20,
                },
            ),
            store,
        }
    }
}
