use thiserror::Error;

use crate::resp::RespError;

/// 顶层 Stream 错误类型
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Reader is already listening")]
    AlreadyListening,

    #[error("Consumer group '{group}' already exists on stream '{stream}'")]
    GroupAlreadyExists { group: String, stream: String },

    #[error("No such stream or group: {0}")]
    NoSuchStreamOrGroup(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// 传输层错误（网络 / 协议 / 服务端错误回复）
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] RespError),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed")]
    Closed,
}

pub type StreamResult<T> = Result<T, StreamError>;

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Transport(TransportError::Io(e))
    }
}

impl From<RespError> for StreamError {
    fn from(e: RespError) -> Self {
        match e {
            RespError::UnexpectedEof => StreamError::Transport(TransportError::Closed),
            other => StreamError::Transport(TransportError::Protocol(other)),
        }
    }
}

impl StreamError {
    /// 将服务端错误回复归类为具体的错误类型
    ///
    /// - `BUSYGROUP ...` -> [`StreamError::GroupAlreadyExists`]
    /// - `NOGROUP ...` / `... requires the key to exist ...` / `no such key` -> [`StreamError::NoSuchStreamOrGroup`]
    /// - 其他 -> [`TransportError::Server`]
    pub fn from_server_message(message: &str, group: Option<&str>, stream: &str) -> Self {
        if message.starts_with("BUSYGROUP") {
            return StreamError::GroupAlreadyExists {
                group: group.unwrap_or_default().to_string(),
                stream: stream.to_string(),
            };
        }

        let lower = message.to_ascii_lowercase();
        if message.starts_with("NOGROUP")
            || lower.contains("requires the key to exist")
            || lower.contains("no such key")
        {
            return StreamError::NoSuchStreamOrGroup(message.to_string());
        }

        StreamError::Transport(TransportError::Server(message.to_string()))
    }

    pub(crate) fn unexpected(what: impl Into<String>) -> Self {
        StreamError::Transport(TransportError::UnexpectedReply(what.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_busygroup() {
        let err = StreamError::from_server_message(
            "BUSYGROUP Consumer Group name already exists",
            Some("g"),
            "s",
        );
        match err {
            StreamError::GroupAlreadyExists { group, stream } => {
                assert_eq!(group, "g");
                assert_eq!(stream, "s");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_missing_key() {
        let err = StreamError::from_server_message(
            "ERR The XGROUP subcommand requires the key to exist. Note that for CREATE you may want to use the MKSTREAM option to create an empty stream automatically.",
            Some("g"),
            "s",
        );
        assert!(matches!(err, StreamError::NoSuchStreamOrGroup(_)));

        let err = StreamError::from_server_message(
            "NOGROUP No such key 's' or consumer group 'g' in XREADGROUP with GROUP option",
            Some("g"),
            "s",
        );
        assert!(matches!(err, StreamError::NoSuchStreamOrGroup(_)));

        let err = StreamError::from_server_message("ERR no such key", None, "s");
        assert!(matches!(err, StreamError::NoSuchStreamOrGroup(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = StreamError::from_server_message(
            "ERR The ID specified in XADD is equal or smaller than the target stream top item",
            None,
            "s",
        );
        assert!(matches!(
            err,
            StreamError::Transport(TransportError::Server(_))
        ));
    }

    #[test]
    fn test_eof_maps_to_closed() {
        let err: StreamError = RespError::UnexpectedEof.into();
        assert!(matches!(err, StreamError::Transport(TransportError::Closed)));
    }
}
