//! Diagnostic logging: forward events to `tracing` and persist to the data dir with rotation.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const LOG_SUBDIR: &str = "logs";
const LOG_FILE: &str = "juniper.log";
const ROTATE_SIZE_BYTES: u64 = 5 * 1024 * 1024; // 5 MB

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DiagnosticPayload {
    pub ts: u64,
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Enable the on-disk log under `<data_dir>/logs`. Without this, events only reach `tracing`.
pub fn init(data_dir: &Path) {
    let dir = data_dir.join(LOG_SUBDIR);
    if std::fs::create_dir_all(&dir).is_ok() {
        let _ = LOG_PATH.set(dir.join(LOG_FILE));
    }
}

fn rotate_if_needed(path: &Path) {
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.len() >= ROTATE_SIZE_BYTES {
            let old = path.with_extension("log.old");
            let _ = std::fs::remove_file(&old);
            let _ = std::fs::rename(path, &old);
        }
    }
}

fn format_line(payload: &DiagnosticPayload) -> String {
    match payload.meta {
        Some(ref m) => format!(
            "{} [{}] {} {}\n",
            payload.ts,
            payload.level.as_str(),
            payload.message,
            m
        ),
        None => format!("{} [{}] {}\n", payload.ts, payload.level.as_str(), payload.message),
    }
}

fn write_to_file(payload: &DiagnosticPayload) {
    let Some(path) = LOG_PATH.get() else {
        return;
    };
    rotate_if_needed(path);
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = f.write_all(format_line(payload).as_bytes());
    }
}

fn emit(payload: &DiagnosticPayload) {
    let meta = payload
        .meta
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_default();
    match payload.level {
        Level::Info => tracing::info!(meta = %meta, "{}", payload.message),
        Level::Warn => tracing::warn!(meta = %meta, "{}", payload.message),
        Level::Error => tracing::error!(meta = %meta, "{}", payload.message),
    }
}

/// Emit a diagnostic event to `tracing` and append it to `logs/juniper.log`.
pub fn log(level: Level, message: &str, meta: Option<serde_json::Value>) {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let payload = DiagnosticPayload {
        ts,
        level,
        message: message.to_string(),
        meta,
    };
    emit(&payload);
    write_to_file(&payload);
}
