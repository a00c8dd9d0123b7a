// 该文件是 Dockline （码头计数） 项目的一部分。
// src/store.rs - 流地址、会话结果与已处理分段的存储
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("摄像头 {0} 没有配置流地址")]
  NotFound(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("数据格式错误: {0}")]
  Malformed(String),
}

/// 摄像头 ID 到流地址的查询
pub trait StreamResolver: Send + Sync {
  fn resolve(&self, camera_id: &str) -> Result<String, StoreError>;
}

/// 地址表中的一项，非字符串的值视为未配置
#[derive(Deserialize)]
#[serde(untagged)]
enum StreamLink {
  Address(String),
  Unusable(IgnoredAny),
}

/// 从 JSON 对象文件加载的地址表：`{"117": "rtsp://..."}`
#[derive(Debug, Default, Clone)]
pub struct JsonStreamTable {
  links: HashMap<String, String>,
}

impl JsonStreamTable {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Self::parse(&text)
  }

  pub fn parse(text: &str) -> Result<Self, StoreError> {
    let entries: HashMap<String, StreamLink> = serde_json::from_str(text)?;
    let links = entries
      .into_iter()
      .filter_map(|(camera_id, link)| match link {
        StreamLink::Address(address) if !address.is_empty() => Some((camera_id, address)),
        _ => None,
      })
      .collect();
    Ok(Self { links })
  }

  pub fn insert(&mut self, camera_id: impl Into<String>, address: impl Into<String>) {
    self.links.insert(camera_id.into(), address.into());
  }
}

impl StreamResolver for JsonStreamTable {
  fn resolve(&self, camera_id: &str) -> Result<String, StoreError> {
    self
      .links
      .get(camera_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(camera_id.to_string()))
  }
}

/// 一次会话的结果记录，按行写入 JSON Lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
  pub visit_id: String,
  pub output_path: String,
  pub object_count: u64,
  #[serde(rename = "timestamp")]
  pub recorded_at: DateTime<Utc>,
}

impl VisitRecord {
  pub fn new(visit_id: impl Into<String>, output_path: impl Into<String>, object_count: u64) -> Self {
    Self {
      visit_id: visit_id.into(),
      output_path: output_path.into(),
      object_count,
      recorded_at: Utc::now(),
    }
  }
}

/// 会话结果持久化，同一 visit_id 只插入一次
pub trait PersistenceSink: Send + Sync {
  /// 返回是否真正写入；重复的 visit_id 被忽略，不算错误
  fn save(&self, record: &VisitRecord) -> Result<bool, StoreError>;
}

/// 追加写入的 JSON Lines 结果日志
pub struct JsonlVisitLog {
  path: PathBuf,
  lock: Mutex<()>,
}

impl JsonlVisitLog {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  fn contains(&self, visit_id: &str) -> Result<bool, StoreError> {
    if !self.path.exists() {
      return Ok(false);
    }
    let text = std::fs::read_to_string(&self.path)?;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
      let record: VisitRecord = serde_json::from_str(line)?;
      if record.visit_id == visit_id {
        return Ok(true);
      }
    }
    Ok(false)
  }
}

impl PersistenceSink for JsonlVisitLog {
  fn save(&self, record: &VisitRecord) -> Result<bool, StoreError> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    if self.contains(&record.visit_id)? {
      debug!("visit {} 已存在，忽略", record.visit_id);
      return Ok(false);
    }
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    writeln!(file, "{}", serde_json::to_string(record)?)?;
    info!(
      "已保存 visit {}，输出 {}，计数 {}",
      record.visit_id, record.output_path, record.object_count
    );
    Ok(true)
  }
}

/// 已处理分段的持久集合
pub trait ProcessedLedger: Send + Sync {
  fn mark_processed(&self, path: &Path) -> Result<(), StoreError>;
  fn is_processed(&self, path: &Path) -> Result<bool, StoreError>;
  /// 目录中最早（按修改时间）尚未处理的分段
  fn next_unprocessed(&self, directory: &Path) -> Result<Option<PathBuf>, StoreError>;
}

/// 以 JSON 数组保存的账本，文件不存在视为空
pub struct JsonLedger {
  path: PathBuf,
  lock: Mutex<()>,
}

const SEGMENT_EXTENSION: &str = "mp4";

impl JsonLedger {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  fn load(&self) -> Result<BTreeSet<String>, StoreError> {
    if !self.path.exists() {
      return Ok(BTreeSet::new());
    }
    let text = std::fs::read_to_string(&self.path)?;
    Ok(serde_json::from_str(&text)?)
  }

  fn store(&self, entries: &BTreeSet<String>) -> Result<(), StoreError> {
    let text = serde_json::to_string(entries)?;
    std::fs::write(&self.path, text)?;
    Ok(())
  }

  pub fn reset(&self) -> Result<(), StoreError> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    if self.path.exists() {
      std::fs::remove_file(&self.path)?;
      info!("已清空处理账本 {}", self.path.display());
    }
    Ok(())
  }
}

fn ledger_key(path: &Path) -> String {
  path.display().to_string()
}

impl ProcessedLedger for JsonLedger {
  fn mark_processed(&self, path: &Path) -> Result<(), StoreError> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    let mut entries = self.load()?;
    if entries.insert(ledger_key(path)) {
      self.store(&entries)?;
    }
    Ok(())
  }

  fn is_processed(&self, path: &Path) -> Result<bool, StoreError> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    Ok(self.load()?.contains(&ledger_key(path)))
  }

  fn next_unprocessed(&self, directory: &Path) -> Result<Option<PathBuf>, StoreError> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    let processed = self.load()?;

    let mut segments = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let entry = entry?;
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
        continue;
      }
      let modified = entry.metadata()?.modified()?;
      segments.push((modified, path));
    }
    segments.sort();

    Ok(
      segments
        .into_iter()
        .map(|(_, path)| path)
        .find(|path| !processed.contains(&ledger_key(path))),
    )
  }
}
