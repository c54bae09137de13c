use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

/// 失败发生在哪个环节。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// 单次数据拉取或文件读取失败。
    Fetch,
    /// 加载任务整体退出。
    LoaderExit,
}

/// 追加写入的 JSONL 错误日志，一行一条失败记录。
#[derive(Clone, Debug)]
pub struct ErrorLogStore {
    path: PathBuf,
}

#[derive(Serialize)]
struct ErrorLogEntry<'a> {
    timestamp_ms: i64,
    stage: FailureStage,
    message: &'a str,
}

impl ErrorLogStore {
    pub fn new(path: PathBuf) -> Self {
        ErrorLogStore { path }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("error_logs.jsonl")
    }

    pub fn append(&self, stage: FailureStage, message: impl AsRef<str>) -> Result<()> {
        let entry = ErrorLogEntry {
            timestamp_ms: Local::now().timestamp_millis(),
            stage,
            message: message.as_ref(),
        };
        self.write_line(&entry)
            .with_context(|| format!("写入错误日志 {} 失败", self.path.display()))
    }

    fn write_line(&self, entry: &ErrorLogEntry<'_>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        serde_json::to_writer(&mut file, entry)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}
