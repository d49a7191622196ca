//! Structured JSONL logging.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → ERROR) via `LOG_LEVEL`
//! 2. One events.jsonl per run under `LOG_DIR`, mirrored to stdout
//! 3. Replay/audit support via a global sequence counter

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }
        let manifest_path = run_dir.join("manifest.json");
        let _ = std::fs::write(
            manifest_path,
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
            })
            .to_string(),
        );
        let events = match File::create(run_dir.join("events.jsonl")) {
            Ok(f) => Some(Mutex::new(BufWriter::new(f))),
            Err(err) => {
                eprintln!("[log] failed to create events log: {}", err);
                None
            }
        };
        RunContext { run_id, events }
    })
}

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds (for replay correlation)
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, module: &str, fields: Map<String, Value>) {
    if level < Level::from_env() {
        return;
    }
    let ctx = ensure_run_context();
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("module".to_string(), json!(module));
    for (k, v) in fields {
        entry.insert(k, v);
    }
    let line = Value::Object(entry).to_string();
    if let Some(writer) = &ctx.events {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
    println!("{}", line);
}

pub fn json_log(module: &str, fields: Map<String, Value>) {
    log(Level::Info, module, fields);
}

pub fn warn_log(module: &str, fields: Map<String, Value>) {
    log(Level::Warn, module, fields);
}

pub fn error_log(module: &str, fields: Map<String, Value>) {
    log(Level::Error, module, fields);
}

pub fn debug_log(module: &str, fields: Map<String, Value>) {
    log(Level::Debug, module, fields);
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut m = Map::new();
    for (k, v) in pairs {
        m.insert(k.to_string(), v.clone());
    }
    m
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

pub fn v_u64(n: u64) -> Value {
    json!(n)
}

pub fn v_bool(b: bool) -> Value {
    Value::Bool(b)
}
