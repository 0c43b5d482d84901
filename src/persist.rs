//! 通知持久化 - 键值槽位上的有界快照保存与加载
//!
//! 持久化边界是一个可失败的 get/set 键值槽位，底层存储技术不限。
//! 保存是尽力而为：失败只记日志，绝不向调用方传播，也不阻塞
//! 聚合路径；加载遇到任何解析失败都退化为空结果，本会话进入
//! 纯内存模式。

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::Notification;

/// 快照所在的槽位键
pub const SNAPSHOT_KEY: &str = "notifications";

/// 默认保留窗口（7 天）
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// 可失败的键值槽位
pub trait KvSlot: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// 文件槽位 - 每个键对应目录下一个 JSON 文件
///
/// 写入走临时文件加原子 rename，并持有目标文件的独占锁，
/// 避免并发进程交错写坏快照。
pub struct FileSlot {
    dir: PathBuf,
}

impl FileSlot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 默认存储目录 `~/.config/stream-notify-center`
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("stream-notify-center")
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KvSlot for FileSlot {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let mut contents = String::new();
        File::open(&path)
            .and_then(|mut file| file.read_to_string(&mut contents))
            .with_context(|| format!("read slot {}", path.display()))?;
        Ok(Some(contents))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        use fs2::FileExt;

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create slot dir {}", self.dir.display()))?;

        let path = self.key_path(key);
        let lock_target = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open slot {}", path.display()))?;
        lock_target.lock_exclusive()?;

        let temp_path = path.with_extension("tmp");
        let result = (|| -> Result<()> {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(value.as_bytes())?;
            fs::rename(&temp_path, &path)?;
            Ok(())
        })();

        lock_target.unlock()?;
        result
    }
}

/// 内存槽位 - 纯内存模式与测试用
#[derive(Default)]
pub struct MemorySlot {
    values: Mutex<std::collections::HashMap<String, String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvSlot for MemorySlot {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// 持久化快照格式
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    saved_at: DateTime<Utc>,
    entries: Vec<Notification>,
}

/// 快照存取
pub struct SnapshotStore {
    slot: Arc<dyn KvSlot>,
    key: String,
    retention: Duration,
    capacity: usize,
}

impl SnapshotStore {
    pub fn new(slot: Arc<dyn KvSlot>) -> Self {
        Self {
            slot,
            key: SNAPSHOT_KEY.to_string(),
            retention: DEFAULT_RETENTION,
            capacity: crate::store::MAX_NOTIFICATIONS,
        }
    }

    /// 设置保留窗口
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// 设置快照条数上限
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// 保存快照（尽力而为）
    pub fn save(&self, entries: &[Notification]) {
        self.save_at(entries, Utc::now());
    }

    /// 保存快照（带时间点，测试用）
    pub fn save_at(&self, entries: &[Notification], now: DateTime<Utc>) {
        let bounded = &entries[..entries.len().min(self.capacity)];
        let snapshot = PersistedSnapshot {
            saved_at: now,
            entries: bounded.to_vec(),
        };

        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "notification snapshot serialization failed");
                return;
            }
        };

        if let Err(e) = self.slot.set(&self.key, &json) {
            warn!(error = %e, "notification snapshot save failed, continuing in memory");
        }
    }

    /// 加载快照，过滤超出保留窗口的条目
    pub fn load(&self) -> Vec<Notification> {
        self.load_at(Utc::now())
    }

    /// 加载快照（带时间点，测试用）
    ///
    /// 条目年龄按加载时刻对照各自的 timestamp 计算；
    /// 过期条目只是不返回，`save` 本身从不物理删除。
    pub fn load_at(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let raw = match self.slot.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "notification snapshot read failed, starting empty");
                return Vec::new();
            }
        };

        let snapshot: PersistedSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "notification snapshot is malformed, starting empty");
                return Vec::new();
            }
        };

        let retention = match chrono::Duration::from_std(self.retention) {
            Ok(retention) => retention,
            Err(_) => chrono::Duration::MAX,
        };

        let total = snapshot.entries.len();
        let entries: Vec<Notification> = snapshot
            .entries
            .into_iter()
            .filter(|entry| now.signed_duration_since(entry.timestamp) <= retention)
            .collect();
        if entries.len() < total {
            debug!(
                expired = total - entries.len(),
                "dropped expired notifications on load"
            );
        }
        entries
    }

    /// 清空持久化槽位
    pub fn clear(&self) {
        self.save_at(&[], Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NotificationKind, NotificationPayload};
    use chrono::Duration as ChronoDuration;

    fn whisper_at(id: &str, timestamp: DateTime<Utc>) -> Notification {
        Notification::new(
            id,
            timestamp,
            NotificationPayload::Whisper {
                sender: "bob".to_string(),
                avatar_url: None,
                message: "hi".to_string(),
                conversation_id: id.to_string(),
            },
        )
    }

    #[test]
    fn test_round_trip_preserves_ids_kinds_read_flags() {
        let store = SnapshotStore::new(Arc::new(MemorySlot::new()));
        let now = Utc::now();

        let mut first = whisper_at("w1", now);
        first.read = true;
        let entries = vec![first, whisper_at("w2", now)];

        store.save_at(&entries, now);
        let loaded = store.load_at(now);

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "w1");
        assert!(loaded[0].read);
        assert_eq!(loaded[0].kind(), NotificationKind::Whisper);
        assert_eq!(loaded[1].id, "w2");
        assert!(!loaded[1].read);
    }

    #[test]
    fn test_load_filters_entries_past_retention() {
        let store = SnapshotStore::new(Arc::new(MemorySlot::new()));
        let now = Utc::now();

        let entries = vec![
            whisper_at("fresh", now - ChronoDuration::days(1)),
            whisper_at("stale", now - ChronoDuration::days(8)),
        ];
        store.save_at(&entries, now - ChronoDuration::days(1));

        let loaded = store.load_at(now);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "fresh");
    }

    #[test]
    fn test_save_caps_entry_count() {
        let slot = Arc::new(MemorySlot::new());
        let store = SnapshotStore::new(slot).with_capacity(3);
        let now = Utc::now();

        let entries: Vec<Notification> = (0..10).map(|i| whisper_at(&format!("w{}", i), now)).collect();
        store.save_at(&entries, now);

        let loaded = store.load_at(now);
        assert_eq!(loaded.len(), 3);
        // 顺序保留，截掉的是尾部（最老的）
        assert_eq!(loaded[0].id, "w0");
        assert_eq!(loaded[2].id, "w2");
    }

    #[test]
    fn test_missing_key_loads_empty() {
        let store = SnapshotStore::new(Arc::new(MemorySlot::new()));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_malformed_snapshot_loads_empty() {
        let slot = Arc::new(MemorySlot::new());
        slot.set(SNAPSHOT_KEY, "{not json").unwrap();
        let store = SnapshotStore::new(slot);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_structurally_invalid_snapshot_loads_empty() {
        let slot = Arc::new(MemorySlot::new());
        slot.set(SNAPSHOT_KEY, r#"{"saved_at":"not-a-number","entries":3}"#).unwrap();
        let store = SnapshotStore::new(slot);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_failing_slot_never_propagates() {
        struct BrokenSlot;
        impl KvSlot for BrokenSlot {
            fn get(&self, _key: &str) -> Result<Option<String>> {
                anyhow::bail!("disk unplugged")
            }
            fn set(&self, _key: &str, _value: &str) -> Result<()> {
                anyhow::bail!("disk unplugged")
            }
        }

        let store = SnapshotStore::new(Arc::new(BrokenSlot));
        // 保存失败只记日志
        store.save(&[whisper_at("w1", Utc::now())]);
        // 读取失败退化为空
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_file_slot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let slot = Arc::new(FileSlot::new(dir.path()));
        let store = SnapshotStore::new(slot.clone());
        let now = Utc::now();

        store.save_at(&[whisper_at("w1", now)], now);
        let loaded = store.load_at(now);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "w1");

        // 槽位文件确实落在目录下
        assert!(dir.path().join("notifications.json").exists());
    }

    #[test]
    fn test_file_slot_missing_dir_get() {
        let slot = FileSlot::new("/nonexistent/surely/missing");
        assert!(slot.get(SNAPSHOT_KEY).unwrap().is_none());
    }

    #[test]
    fn test_clear_empties_slot() {
        let slot = Arc::new(MemorySlot::new());
        let store = SnapshotStore::new(slot);
        let now = Utc::now();

        store.save_at(&[whisper_at("w1", now)], now);
        assert_eq!(store.load_at(now).len(), 1);

        store.clear();
        assert!(store.load_at(now).is_empty());
    }
}
