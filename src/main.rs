//! redis-stream 命令行工具
//!
//! 对 Redis 服务器执行 stream 的发布、读取、确认和消费组管理。

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use redis_stream::{
    ConnectionConfig, Entry, GroupManager, InfoKind, LATEST_ID, NEW_ENTRIES, Producer,
    ReadOptions, Reader, ReaderConfig, RespClient, StreamCursors, StreamError,
};

#[derive(Parser, Debug)]
#[command(name = "redis-stream")]
#[command(about = "Publish, consume and manage Redis streams through consumer groups")]
struct Args {
    /// Redis 服务器地址
    #[arg(short, long)]
    addr: Option<String>,

    /// 数据库编号
    #[arg(long)]
    db: Option<u32>,

    /// 连接超时（毫秒）
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// 未指定 --block 时的阻塞读取时间（毫秒）
    #[arg(long, default_value = "1000")]
    read_timeout_ms: u64,

    /// JSON 格式的连接配置文件，命令行参数优先
    #[arg(long)]
    config: Option<PathBuf>,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 追加一条条目: publish <stream> k=v [k=v ...]
    Publish {
        stream: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// 创建消费组
    CreateGroup {
        group: String,
        stream: String,
        #[arg(long, default_value = LATEST_ID)]
        start: String,
        /// stream 不存在时不自动创建
        #[arg(long)]
        no_mkstream: bool,
    },
    /// 销毁消费组
    DeleteGroup { group: String, stream: String },
    /// 从消费组移除消费者
    RemoveConsumer {
        group: String,
        stream: String,
        consumer: String,
    },
    /// 单次读取
    Read {
        group: String,
        stream: String,
        /// 省略时生成随机名称
        consumer: Option<String>,
        #[arg(long, default_value = NEW_ENTRIES)]
        cursor: String,
        #[arg(long)]
        count: Option<usize>,
        #[arg(long)]
        block: Option<u64>,
    },
    /// 持续监听，直到收到 --max 条
    Listen {
        group: String,
        stream: String,
        /// 省略时生成随机名称
        consumer: Option<String>,
        #[arg(long)]
        max: Option<usize>,
        /// 处理后自动确认
        #[arg(long)]
        ack: bool,
    },
    /// 确认条目
    Ack {
        group: String,
        stream: String,
        id: String,
    },
    /// 删除条目
    Delete { stream: String, id: String },
    /// 查询元数据
    Info {
        kind: InfoArg,
        key: String,
        group: Option<String>,
    },
    /// 删除整个 stream
    Clear { stream: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum InfoArg {
    Stream,
    Groups,
    Consumers,
}

impl From<InfoArg> for InfoKind {
    fn from(arg: InfoArg) -> Self {
        match arg {
            InfoArg::Stream => InfoKind::Stream,
            InfoArg::Groups => InfoKind::Groups,
            InfoArg::Consumers => InfoKind::Consumers,
        }
    }
}

fn connection_config(args: &Args) -> Result<ConnectionConfig, StreamError> {
    let mut config = match &args.config {
        Some(path) => ConnectionConfig::from_json_file(path)?,
        None => ConnectionConfig::default(),
    };
    if let Some(addr) = &args.addr {
        config.addr = addr.clone();
    }
    if let Some(db) = args.db {
        config.database = db;
    }
    if let Some(ms) = args.connect_timeout_ms {
        config.connect_timeout_ms = ms;
    }
    Ok(config)
}

fn parse_fields(stream: &str, fields: &[String]) -> Result<Entry, StreamError> {
    let mut pairs = Vec::with_capacity(fields.len());
    for field in fields {
        let (k, v) = field.split_once('=').ok_or_else(|| {
            StreamError::Validation(format!("field '{}' is not in k=v form", field))
        })?;
        pairs.push((k.to_string(), v.to_string()));
    }
    Ok(Entry::new(stream, pairs))
}

fn consumer_name(consumer: Option<String>) -> String {
    consumer.unwrap_or_else(|| format!("consumer-{:08x}", rand::random::<u32>()))
}

fn print_entry(entry: &Entry) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string(entry)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = connection_config(&args)?;
    let client = Arc::new(RespClient::connect(&config).await?);
    let reader_config = ReaderConfig {
        read_timeout_ms: args.read_timeout_ms,
    };

    match args.command {
        Command::Publish { stream, fields } => {
            let entry = parse_fields(&stream, &fields)?;
            let published = Producer::new(client).publish(&entry).await?;
            print_entry(&published)?;
        }
        Command::CreateGroup {
            group,
            stream,
            start,
            no_mkstream,
        } => {
            GroupManager::new(client)
                .create_group_from(&group, &stream, &start, !no_mkstream)
                .await?;
            println!("OK");
        }
        Command::DeleteGroup { group, stream } => {
            let discarded = GroupManager::new(client).delete_group(&group, &stream).await?;
            println!("{}", discarded);
        }
        Command::RemoveConsumer {
            group,
            stream,
            consumer,
        } => {
            let pending = GroupManager::new(client)
                .remove_consumer(&group, &stream, &consumer)
                .await?;
            println!("{}", pending);
        }
        Command::Read {
            group,
            consumer,
            stream,
            cursor,
            count,
            block,
        } => {
            let reader = Reader::with_config(client, reader_config);
            let options = ReadOptions {
                block,
                count,
                noack: false,
            };
            let cursors = StreamCursors::new().with(stream, cursor);
            let entries = reader
                .read(&group, &consumer_name(consumer), &cursors, options)
                .await?;
            for entry in &entries {
                print_entry(entry)?;
            }
        }
        Command::Listen {
            group,
            consumer,
            stream,
            max,
            ack,
        } => {
            let reader = Reader::with_config(client, reader_config);
            let consumer = consumer_name(consumer);
            let cursors = StreamCursors::new_entries(stream);
            let mut received = 0usize;
            let reader_ref = &reader;
            let group_ref = group.as_str();
            info!("Listening as {}/{}", group, consumer);

            reader
                .listen(&group, &consumer, &cursors, ReadOptions::new(), move |entry| {
                    received += 1;
                    if max.is_some_and(|max| received >= max) {
                        reader_ref.stop();
                    }
                    async move {
                        let line = serde_json::to_string(&entry)
                            .map_err(|e| StreamError::Validation(e.to_string()))?;
                        println!("{}", line);
                        if ack {
                            reader_ref.ack(group_ref, &entry).await?;
                        }
                        Ok(())
                    }
                })
                .await?;
        }
        Command::Ack { group, stream, id } => {
            let reader = Reader::new(client);
            let entry = Entry::new(stream, Vec::<(String, String)>::new()).with_id(id);
            println!("{}", reader.ack(&group, &entry).await?);
        }
        Command::Delete { stream, id } => {
            let reader = Reader::new(client);
            let entry = Entry::new(stream, Vec::<(String, String)>::new()).with_id(id);
            println!("{}", reader.delete(&entry).await?);
        }
        Command::Info { kind, key, group } => {
            let records = GroupManager::new(client)
                .info(kind.into(), &key, group.as_deref())
                .await?;
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        Command::Clear { stream } => {
            println!("{}", Producer::new(client).clear_stream(&stream).await?);
        }
    }

    Ok(())
}
