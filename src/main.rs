//! Purpose: `drpc-bridge` CLI entry point for driving bridge operations against a live daemon.
//! Role: Binary crate root; parses args, connects with handshake, runs one operation, closes.
//! Invariants: Successful results are emitted as one JSON object on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueHint};
use drpc_bridge::api::{
    DrpcClient, DrpcConfig, EngineInfo, Error, ErrorKind, EventType, ExtendedInfo,
    MediaErrorKind, PoolId, RankList, RasEvent, Severity, StaticAddressing, StaticListener,
    UnixTransport, default_socket_dir, to_exit_code,
};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "drpc-bridge",
    version,
    about = "Engine-side dRPC bridge to the local control-plane daemon",
    long_about = None,
    after_help = r#"EXAMPLES
  $ drpc-bridge --socket-dir /var/run/daos_server ready
  $ drpc-bridge bio-error write --target 3
  $ drpc-bridge pool-svc-update 6f7b1c4e-0d4a-4b8e-9e52-3c1d2a5b6c7d 0 1 2
  $ drpc-bridge get-pool-svc 6f7b1c4e-0d4a-4b8e-9e52-3c1d2a5b6c7d
  $ drpc-bridge ras engine_test "something happened" --severity warn"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "Directory holding daos_server.sock (default: $DAOS_SOCKET_DIR or /var/run/daos_server)",
        value_hint = ValueHint::DirPath
    )]
    socket_dir: Option<PathBuf>,
    #[arg(
        long,
        default_value = "ofi+tcp://127.0.0.1:31416",
        help = "Self URI reported for this engine"
    )]
    uri: String,
    #[arg(
        long,
        help = "Engine dRPC listener socket reported to the daemon (default: <socket-dir>/daos_engine_<idx>.sock)",
        value_hint = ValueHint::FilePath
    )]
    listener_sock: Option<PathBuf>,
    #[arg(long, default_value_t = 0, help = "Engine instance index")]
    instance_idx: u32,
    #[arg(long, default_value_t = 1, help = "Number of targets served by this engine")]
    targets: u32,
    #[arg(long, default_value_t = 0, help = "Number of helper contexts")]
    helpers: u32,
    #[arg(long, help = "Socket read/write timeout in milliseconds")]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Connect and perform only the readiness handshake")]
    Ready,
    #[command(about = "Report a media error: write|read|unmap|checksum")]
    BioError {
        kind: String,
        #[arg(long, help = "Target id that hit the error")]
        target: u32,
    },
    #[command(about = "Publish updated pool service replica ranks")]
    PoolSvcUpdate {
        pool: String,
        #[arg(required = true, num_args = 1..)]
        ranks: Vec<u32>,
    },
    #[command(about = "Query pool service replica ranks")]
    GetPoolSvc { pool: String },
    #[command(about = "Send a generic RAS event")]
    Ras {
        id: String,
        message: String,
        #[arg(long, default_value = "info", help = "fatal|warn|error|info")]
        severity: String,
        #[arg(long = "type", default_value = "info_only", help = "state_change|info_only")]
        event_type: String,
        #[arg(long, help = "Rank that raised the event")]
        rank: Option<u32>,
        #[arg(long, help = "Free-form extended info")]
        detail: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();
    let exit_code = match run(cli) {
        Ok(value) => {
            println!("{value}");
            0
        }
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

/// Validated form of a subcommand, resolved before any socket is opened.
enum Op {
    Ready,
    BioError(MediaErrorKind, u32),
    PoolSvcUpdate(PoolId, RankList),
    GetPoolSvc(PoolId),
    Ras {
        id: String,
        message: String,
        severity: Severity,
        event_type: EventType,
        rank: Option<u32>,
        detail: Option<String>,
    },
}

impl Op {
    fn resolve(command: Command) -> Result<Self, Error> {
        Ok(match command {
            Command::Ready => Op::Ready,
            Command::BioError { kind, target } => Op::BioError(kind.parse()?, target),
            Command::PoolSvcUpdate { pool, ranks } => {
                Op::PoolSvcUpdate(PoolId::parse(&pool)?, RankList::new(ranks))
            }
            Command::GetPoolSvc { pool } => Op::GetPoolSvc(PoolId::parse(&pool)?),
            Command::Ras {
                id,
                message,
                severity,
                event_type,
                rank,
                detail,
            } => Op::Ras {
                id,
                message,
                severity: severity.parse()?,
                event_type: event_type.parse()?,
                rank,
                detail,
            },
        })
    }
}

fn run(cli: Cli) -> Result<Value, Error> {
    let op = Op::resolve(cli.command)?;
    let socket_dir = cli.socket_dir.unwrap_or_else(default_socket_dir);
    let listener = cli.listener_sock.unwrap_or_else(|| {
        socket_dir.join(format!("daos_engine_{}.sock", cli.instance_idx))
    });
    let transport =
        UnixTransport::new().with_timeout(cli.timeout_ms.map(Duration::from_millis));
    let config = DrpcConfig::new().with_socket_dir(&socket_dir);
    let engine = EngineInfo::new(cli.instance_idx, cli.targets).with_helpers(cli.helpers);
    let client = DrpcClient::new(
        transport,
        config,
        engine,
        Arc::new(StaticAddressing::new(cli.uri)),
        Arc::new(StaticListener::new(listener)),
    );

    client.connect()?;
    let result = dispatch(&client, op);
    let closed = client.close();
    let value = result?;
    closed?;
    Ok(value)
}

fn dispatch(client: &DrpcClient<UnixTransport>, op: Op) -> Result<Value, Error> {
    match op {
        Op::Ready => Ok(json!({
            "ready": true,
            "socket": client.config().socket_path().display().to_string(),
            "num_contexts": client.engine().num_contexts(),
        })),
        Op::BioError(kind, target) => {
            client.notify_bio_error(kind, target)?;
            Ok(json!({"notified": "bio_error", "kind": kind.as_str(), "target": target}))
        }
        Op::PoolSvcUpdate(pool, ranks) => {
            client.notify_pool_svc_update(&pool, &ranks)?;
            Ok(json!({
                "notified": "pool_svc_update",
                "pool": pool.to_string(),
                "svc_reps": ranks.as_slice(),
            }))
        }
        Op::GetPoolSvc(pool) => {
            let ranks = client.get_pool_svc_ranks(&pool)?;
            Ok(json!({"pool": pool.to_string(), "svc_reps": ranks.as_slice()}))
        }
        Op::Ras {
            id,
            message,
            severity,
            event_type,
            rank,
            detail,
        } => {
            let mut event = RasEvent::build(&id, severity, event_type, &message)?;
            if let Some(rank) = rank {
                event = event.with_rank(rank);
            }
            if let Some(detail) = detail {
                event = event.with_extended_info(ExtendedInfo::Str(detail));
            }
            client.notify_ras_event(&event)?;
            Ok(json!({
                "notified": "ras",
                "id": event.id(),
                "timestamp": event.timestamp(),
                "hostname": event.hostname(),
            }))
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Uninitialized => "dRPC not connected".to_string(),
        ErrorKind::InvalidArgument => "invalid argument".to_string(),
        ErrorKind::OutOfMemory => "out of memory".to_string(),
        ErrorKind::Io => "dRPC i/o failure".to_string(),
        ErrorKind::Remote => "request rejected by server".to_string(),
        ErrorKind::Decode => "malformed dRPC response".to_string(),
    }
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}
