//! XREADGROUP 回复模型与解析
//!
//! 回复按 stream 顺序排列，每个 stream 内按条目到达顺序排列。
//! 解析时先按 stream 顺序、再按条目顺序展开，不做跨 stream 的时间戳合并。

use crate::entry::{Entry, Payload, StreamId};
use crate::error::{StreamError, StreamResult};

/// 条目的原始字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFields {
    /// 键值交替的扁平序列: k1, v1, k2, v2, ...
    Flat(Vec<String>),
    /// 已经组装好的映射，原样透传
    Map(Payload),
}

/// 单条原始记录；`fields` 为 None 表示条目已被删除或裁剪
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub id: String,
    pub fields: Option<RawFields>,
}

/// 单个 stream 的读取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReply {
    pub stream: String,
    pub records: Vec<RawRecord>,
}

impl RawRecord {
    pub fn flat<I, S>(id: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            fields: Some(RawFields::Flat(fields.into_iter().map(Into::into).collect())),
        }
    }

    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: None,
        }
    }
}

/// 将原始字段转换为 payload
///
/// 扁平序列按相邻两项配对，重复键以后出现的为准；长度为奇数时报错。
pub fn fields_to_payload(fields: RawFields) -> StreamResult<Payload> {
    match fields {
        RawFields::Map(map) => Ok(map),
        RawFields::Flat(items) => {
            if items.len() % 2 != 0 {
                return Err(StreamError::unexpected(format!(
                    "odd number of field elements: {}",
                    items.len()
                )));
            }
            let mut payload = Payload::new();
            let mut iter = items.into_iter();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                payload.insert(key, value);
            }
            Ok(payload)
        }
    }
}

/// 将 XREADGROUP 回复展开为有序的条目序列，丢弃没有 payload 的记录
pub fn parse_read_response(reply: Vec<StreamReply>) -> StreamResult<Vec<Entry>> {
    let mut entries = Vec::new();

    for StreamReply { stream, records } in reply {
        for RawRecord { id, fields } in records {
            if id.parse::<StreamId>().is_err() {
                return Err(StreamError::unexpected(format!(
                    "invalid entry id '{}' in stream '{}'",
                    id, stream
                )));
            }

            let Some(fields) = fields else {
                continue;
            };
            let payload = fields_to_payload(fields)?;
            if payload.is_empty() {
                continue;
            }

            entries.push(Entry::resolved(stream.clone(), id, payload));
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_flat_fields_are_paired() {
        let fields = RawFields::Flat(vec![
            "foo".into(),
            "bar".into(),
            "woo".into(),
            "xoo".into(),
        ]);
        assert_eq!(
            fields_to_payload(fields).unwrap(),
            payload(&[("foo", "bar"), ("woo", "xoo")])
        );
    }

    #[test]
    fn test_flat_duplicate_key_last_wins() {
        let fields = RawFields::Flat(vec!["k".into(), "1".into(), "k".into(), "2".into()]);
        assert_eq!(fields_to_payload(fields).unwrap(), payload(&[("k", "2")]));
    }

    #[test]
    fn test_flat_odd_length_rejected() {
        let fields = RawFields::Flat(vec!["k".into(), "1".into(), "dangling".into()]);
        let err = fields_to_payload(fields).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Transport(TransportError::UnexpectedReply(_))
        ));
    }

    #[test]
    fn test_map_fields_pass_through() {
        let map = payload(&[("a", "1")]);
        assert_eq!(fields_to_payload(RawFields::Map(map.clone())).unwrap(), map);
    }

    #[test]
    fn test_order_across_streams_and_tombstones() {
        let reply = vec![
            StreamReply {
                stream: "b".into(),
                records: vec![
                    RawRecord::flat("5-0", ["x", "1"]),
                    RawRecord::tombstone("6-0"),
                    RawRecord::flat("7-0", ["x", "2"]),
                ],
            },
            StreamReply {
                stream: "a".into(),
                records: vec![RawRecord {
                    id: "1-0".into(),
                    fields: Some(RawFields::Map(payload(&[("y", "3")]))),
                }],
            },
        ];

        let entries = parse_read_response(reply).unwrap();
        let keys: Vec<(&str, &str)> = entries.iter().map(|e| (e.stream(), e.id())).collect();
        assert_eq!(keys, vec![("b", "5-0"), ("b", "7-0"), ("a", "1-0")]);
        assert!(entries.iter().all(Entry::is_resolved));
    }

    #[test]
    fn test_empty_fields_dropped() {
        let reply = vec![StreamReply {
            stream: "s".into(),
            records: vec![RawRecord::flat("1-0", Vec::<String>::new())],
        }];
        assert!(parse_read_response(reply).unwrap().is_empty());
    }

    #[test]
    fn test_unresolved_id_rejected() {
        let reply = vec![StreamReply {
            stream: "s".into(),
            records: vec![RawRecord::flat("*", ["a", "b"])],
        }];
        assert!(parse_read_response(reply).is_err());
    }
}
