//! 通知存储 - 内存中有界、最新优先的通知列表
//!
//! 列表由引擎独占持有，所有变更经由引擎的命令队列串行执行。
//! 排序严格按插入顺序（最新在前），与 timestamp 平局无关。

use crate::model::Notification;

/// 默认容量
pub const MAX_NOTIFICATIONS: usize = 20;

/// 插入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 新条目，已置于列表头部
    Inserted,
    /// 命中已有 id，原地更新
    Updated,
}

/// 通知存储
#[derive(Debug)]
pub struct NotificationStore {
    entries: Vec<Notification>,
    capacity: usize,
}

impl NotificationStore {
    /// 创建空存储
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// 以已有条目初始化（从持久化快照恢复时使用），超出容量的尾部被丢弃
    pub fn with_entries(capacity: usize, entries: Vec<Notification>) -> Self {
        let mut store = Self::new(capacity);
        store.entries = entries;
        store.entries.truncate(store.capacity);
        store
    }

    /// 插入或更新通知
    ///
    /// 同 id 条目已存在时原地更新 payload 与 timestamp，保留已读
    /// 标记（幂等 upsert，吸收后端的 at-least-once 重复投递）；
    /// 否则作为最新条目前插，并截断到容量上限。
    pub fn insert(&mut self, notification: Notification) -> InsertOutcome {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|entry| entry.id == notification.id)
        {
            existing.payload = notification.payload;
            existing.timestamp = notification.timestamp;
            return InsertOutcome::Updated;
        }

        self.entries.insert(0, notification);
        self.entries.truncate(self.capacity);
        InsertOutcome::Inserted
    }

    /// 标记单条已读，返回是否发生变化（幂等）
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) if !entry.read => {
                entry.read = true;
                true
            }
            _ => false,
        }
    }

    /// 全部标记已读，返回新标记的条数
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if !entry.read {
                entry.read = true;
                changed += 1;
            }
        }
        changed
    }

    /// 移除单条，id 不存在时为 no-op
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// 清空列表
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 未读条数
    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.read).count()
    }

    /// 按 id 查找
    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// 当前条目（最新在前）
    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new(MAX_NOTIFICATIONS)
    }
}
