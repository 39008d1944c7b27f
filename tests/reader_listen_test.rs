// reader_listen_test.rs
// 监听循环的状态机：stop、重入、错误复位

mod common;

use std::sync::Arc;
use std::time::Duration;

use redis_stream::{
    Entry, Payload, RawFields, RawRecord, ReadOptions, Reader, ReaderConfig, StreamClient,
    StreamCursors, StreamError, StreamReply, TransportError,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use crate::common::TestStreams;
use crate::common::scripted_client::ScriptedClient;

fn fast_config() -> ReaderConfig {
    ReaderConfig {
        read_timeout_ms: 20,
    }
}

async fn wait_until_listening<C: StreamClient>(reader: &Reader<C>) {
    for _ in 0..100 {
        if reader.is_listening() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("reader never started listening");
}

#[tokio::test]
async fn test_listen_receives_published_entries_until_stopped() {
    let t = TestStreams::new();
    t.groups.create_group("g", "s").await.unwrap();

    let reader = Arc::new(Reader::with_config(t.store.clone(), fast_config()));
    let (tx, mut rx) = mpsc::unbounded_channel::<Entry>();

    let listener = reader.clone();
    let handle = tokio::spawn(async move {
        listener
            .listen(
                "g",
                "c1",
                &StreamCursors::new_entries("s"),
                ReadOptions::new(),
                |entry| {
                    let _ = tx.send(entry);
                    async { Ok(()) }
                },
            )
            .await
    });

    wait_until_listening(&reader).await;
    for i in 0..3 {
        t.producer
            .publish(&Entry::new("s", [("i", i.to_string())]))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let entry = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("entry not delivered in time")
            .expect("listener closed the channel");
        seen.push(entry.get("i").unwrap_or_default().to_string());
    }
    assert_eq!(seen, vec!["0", "1", "2"]);

    reader.stop();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("listen did not stop")
        .unwrap()
        .unwrap();
    assert!(!reader.is_listening());
}

#[tokio::test]
async fn test_second_listen_is_rejected_while_active() {
    let t = TestStreams::new();
    t.groups.create_group("g", "s").await.unwrap();
    let reader = Arc::new(Reader::with_config(t.store.clone(), fast_config()));

    let listener = reader.clone();
    let handle = tokio::spawn(async move {
        listener
            .listen(
                "g",
                "c1",
                &StreamCursors::new_entries("s"),
                ReadOptions::new(),
                |_entry| async { Ok(()) },
            )
            .await
    });
    wait_until_listening(&reader).await;

    let err = reader
        .listen(
            "g",
            "c2",
            &StreamCursors::new_entries("s"),
            ReadOptions::new(),
            |_entry| async { Ok(()) },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::AlreadyListening));
    // 被拒绝的调用不影响正在进行的循环
    assert!(reader.is_listening());

    reader.stop();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("listen did not stop")
        .unwrap()
        .unwrap();

    // 停止后可以再次监听
    t.producer
        .publish(&Entry::new("s", [("a", "1")]))
        .await
        .unwrap();
    let mut received = 0;
    reader
        .listen(
            "g",
            "c1",
            &StreamCursors::new_entries("s"),
            ReadOptions::new(),
            |_entry| {
                received += 1;
                reader.stop();
                async { Ok(()) }
            },
        )
        .await
        .unwrap();
    assert_eq!(received, 1);
}

#[tokio::test]
async fn test_transport_error_resets_state() {
    let client = ScriptedClient::new();
    client.push_error(TransportError::Closed);
    let reader = Reader::with_config(client.clone(), fast_config());

    let err = reader
        .listen(
            "g",
            "c1",
            &StreamCursors::new_entries("s"),
            ReadOptions::new(),
            |_entry| async { Ok(()) },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::Transport(TransportError::Closed)
    ));
    assert!(!reader.is_listening());

    client.push_reply(vec![StreamReply {
        stream: "s".to_string(),
        records: vec![RawRecord::flat("1-0", ["k", "v"])],
    }]);
    let mut seen = Vec::new();
    reader
        .listen(
            "g",
            "c1",
            &StreamCursors::new_entries("s"),
            ReadOptions::new(),
            |entry| {
                seen.push(entry.id().to_string());
                reader.stop();
                async { Ok(()) }
            },
        )
        .await
        .unwrap();
    assert_eq!(seen, vec!["1-0"]);
}

#[tokio::test]
async fn test_callback_error_stops_loop() {
    let client = ScriptedClient::new();
    client.push_reply(vec![StreamReply {
        stream: "s".to_string(),
        records: vec![
            RawRecord::flat("1-0", ["k", "v"]),
            RawRecord::flat("2-0", ["k", "v"]),
        ],
    }]);
    let reader = Reader::with_config(client, fast_config());

    let mut calls = 0;
    let err = reader
        .listen(
            "g",
            "c1",
            &StreamCursors::new_entries("s"),
            ReadOptions::new(),
            |_entry| {
                calls += 1;
                async { Err(StreamError::Validation("rejected".to_string())) }
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Validation(_)));
    assert_eq!(calls, 1);
    assert!(!reader.is_listening());
}

#[tokio::test]
async fn test_map_fields_and_tombstones() {
    let client = ScriptedClient::new();
    let mut map = Payload::new();
    map.insert("foo".to_string(), "bar".to_string());
    client.push_timeout();
    client.push_reply(vec![
        StreamReply {
            stream: "a".to_string(),
            records: vec![
                RawRecord {
                    id: "5-0".to_string(),
                    fields: Some(RawFields::Map(map)),
                },
                RawRecord::tombstone("6-0"),
            ],
        },
        StreamReply {
            stream: "b".to_string(),
            records: vec![RawRecord::flat("1-0", ["x", "1", "x", "2"])],
        },
    ]);
    let reader = Reader::with_config(client.clone(), fast_config());

    let cursors: StreamCursors = [("a", ">"), ("b", ">")].into_iter().collect();
    let mut seen = Vec::new();
    reader
        .listen(
            "g",
            "c1",
            &cursors,
            ReadOptions::new(),
            |entry| {
                seen.push(entry);
                reader.stop();
                async { Ok(()) }
            },
        )
        .await
        .unwrap();

    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].stream(), "a");
    assert_eq!(seen[0].get("foo"), Some("bar"));
    assert_eq!(seen[1].stream(), "b");
    assert_eq!(seen[1].get("x"), Some("2"));

    // 第一次拉取超时，第二次拿到数据
    let reads = client.reads();
    assert_eq!(reads.len(), 2);
    assert!(reads.iter().all(|o| o.block == Some(20)));
}

#[tokio::test]
async fn test_listen_acks_inside_callback() {
    let t = TestStreams::new();
    t.groups.create_group("g", "s").await.unwrap();
    t.producer
        .publish(&Entry::new("s", [("a", "1")]))
        .await
        .unwrap();

    let reader = &t.reader;
    reader
        .listen(
            "g",
            "c1",
            &StreamCursors::new_entries("s"),
            ReadOptions::new(),
            move |entry| {
                reader.stop();
                async move {
                    reader.ack("g", &entry).await?;
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

    assert_eq!(t.store.pending_count("s", "g"), Some(0));
}

#[tokio::test]
async fn test_listen_acks_each_entry_on_its_stream() {
    let client = ScriptedClient::new();
    client.push_reply(vec![
        StreamReply {
            stream: "a".to_string(),
            records: vec![RawRecord::flat("1-0", ["k", "v"])],
        },
        StreamReply {
            stream: "b".to_string(),
            records: vec![
                RawRecord::tombstone("2-0"),
                RawRecord::flat("3-0", ["k", "v"]),
            ],
        },
    ]);
    let reader = Reader::with_config(client.clone(), fast_config());

    let cursors: StreamCursors = [("a", ">"), ("b", ">")].into_iter().collect();
    let reader_ref = &reader;
    reader
        .listen("g", "c1", &cursors, ReadOptions::new(), move |entry| {
            reader_ref.stop();
            async move {
                reader_ref.ack("g", &entry).await?;
                Ok(())
            }
        })
        .await
        .unwrap();

    // 被删除的条目不会交给回调，也就不会被确认
    assert_eq!(
        client.acked(),
        vec![
            ("a".to_string(), "g".to_string(), "1-0".to_string()),
            ("b".to_string(), "g".to_string(), "3-0".to_string()),
        ]
    );
}
