//! 通知引擎 - 单队列串行化所有状态变更的核心 actor
//!
//! 事件源、计时到期和用户操作都以命令形式进入同一条 mpsc 队列，
//! 由引擎任务逐条处理。两个几乎同时到达的同类事件不可能交错
//! 各自的 accumulate/flush 步骤，这是本设计要关死的主要风险。
//!
//! 计时不单独起任务：select 循环每轮取聚合器与展示控制器中最近
//! 的 deadline 睡到点再 tick。重新武装即替换 deadline，循环退出
//! 后不可能再有迟到的计时回调。
//!
//! 停机顺序是保证的：先退出循环（计时作废），再强制 flush 所有
//! 未落盘的聚合状态，最后同步保存快照。跳过任何一步都会静默
//! 丢失已聚合未 flush 的事件。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cluster::{ClusterAggregator, FlushedCluster, DEFAULT_IDLE_WINDOW, MAX_CONTRIBUTING_EVENTS};
use crate::ingest::{EventIngestor, IngestedEvent};
use crate::model::{Notification, NotificationPayload};
use crate::persist::{KvSlot, SnapshotStore, DEFAULT_RETENTION};
use crate::presenter::{PanelState, PresentationController, DEFAULT_PREVIEW_DURATION};
use crate::router::{DeliveryRouter, SoundPrefs};
use crate::store::{NotificationStore, MAX_NOTIFICATIONS};

/// 头像补全的默认超时
pub const DEFAULT_ENRICH_TIMEOUT: Duration = Duration::from_millis(800);

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 存储容量
    pub capacity: usize,
    /// 聚合空闲窗口
    pub idle_window: Duration,
    /// 预览自动隐藏时长
    pub preview_duration: Duration,
    /// 持久化保留窗口
    pub retention: Duration,
    /// 单个 cluster 保留的原始子事件上限
    pub max_cluster_events: usize,
    /// 头像补全超时
    pub enrich_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_NOTIFICATIONS,
            idle_window: DEFAULT_IDLE_WINDOW,
            preview_duration: DEFAULT_PREVIEW_DURATION,
            retention: DEFAULT_RETENTION,
            max_cluster_events: MAX_CONTRIBUTING_EVENTS,
            enrich_timeout: DEFAULT_ENRICH_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// 设置存储容量
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// 设置聚合空闲窗口
    pub fn with_idle_window(mut self, window: Duration) -> Self {
        self.idle_window = window;
        self
    }

    /// 设置预览时长
    pub fn with_preview_duration(mut self, duration: Duration) -> Self {
        self.preview_duration = duration;
        self
    }

    /// 设置保留窗口
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// 头像解析协作方
///
/// 返回一个 oneshot 接收端，引擎在有界超时内等待；超时或对端
/// 放弃时通知照常发出，只是缺少头像。基础插入路径永远不被
/// 补全阻塞到超时之外。
pub trait AvatarResolver: Send + Sync {
    fn request(&self, login: &str) -> oneshot::Receiver<String>;
}

/// 引擎命令
#[derive(Debug)]
pub enum EngineCommand {
    /// 归一化后的入站事件
    Ingest(IngestedEvent),
    /// 标记单条已读
    MarkRead(String),
    /// 全部标记已读
    MarkAllRead,
    /// 移除单条
    Remove(String),
    /// 清空列表
    ClearAll,
    /// 用户激活面板控件
    Activate,
    /// 用户关闭展开面板
    Dismiss,
    /// 外部请求立即 flush 所有聚合状态
    FlushNow,
    /// 更新声音偏好（外部输入）
    SetSoundPrefs(SoundPrefs),
    /// 查询当前状态
    Query(oneshot::Sender<EngineSnapshot>),
    /// 停机（带完成回执）
    Shutdown(oneshot::Sender<()>),
}

/// 查询结果
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    /// 当前条目（最新在前）
    pub entries: Vec<Notification>,
    /// 未读条数
    pub unread: usize,
    /// 面板状态
    pub panel: PanelState,
}

/// 引擎句柄（可克隆，跨任务提交命令）
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    /// 提交入站事件，引擎已退出时返回 false
    pub fn submit(&self, event: IngestedEvent) -> bool {
        self.tx.send(EngineCommand::Ingest(event)).is_ok()
    }

    /// 创建绑定本引擎的事件接入器
    pub fn ingestor(&self) -> EventIngestor {
        EventIngestor::new(self.clone())
    }

    pub fn mark_read(&self, id: impl Into<String>) {
        let _ = self.tx.send(EngineCommand::MarkRead(id.into()));
    }

    pub fn mark_all_read(&self) {
        let _ = self.tx.send(EngineCommand::MarkAllRead);
    }

    pub fn remove(&self, id: impl Into<String>) {
        let _ = self.tx.send(EngineCommand::Remove(id.into()));
    }

    pub fn clear_all(&self) {
        let _ = self.tx.send(EngineCommand::ClearAll);
    }

    /// 用户激活面板控件
    pub fn activate(&self) {
        let _ = self.tx.send(EngineCommand::Activate);
    }

    /// 用户关闭展开面板
    pub fn dismiss(&self) {
        let _ = self.tx.send(EngineCommand::Dismiss);
    }

    /// 请求立即 flush 所有聚合状态
    pub fn flush_now(&self) {
        let _ = self.tx.send(EngineCommand::FlushNow);
    }

    /// 更新声音偏好
    pub fn set_sound_prefs(&self, prefs: SoundPrefs) {
        let _ = self.tx.send(EngineCommand::SetSoundPrefs(prefs));
    }

    /// 查询当前状态，引擎已退出时返回 None
    pub async fn snapshot(&self) -> Option<EngineSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(EngineCommand::Query(reply_tx)).is_err() {
            return None;
        }
        reply_rx.await.ok()
    }

    /// 停机并等待 teardown 完成
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(EngineCommand::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> (Self, mpsc::UnboundedReceiver<EngineCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// 通知引擎
pub struct NotificationEngine {
    config: EngineConfig,
    store: NotificationStore,
    aggregator: ClusterAggregator,
    presenter: PresentationController,
    router: DeliveryRouter,
    snapshots: SnapshotStore,
    sound_prefs: SoundPrefs,
    avatar: Option<Arc<dyn AvatarResolver>>,
    rx: mpsc::UnboundedReceiver<EngineCommand>,
    /// flush 产生的通知 id 序号，保证同毫秒内也不重复
    seq: u64,
}

impl NotificationEngine {
    /// 创建引擎并从槽位恢复历史
    pub fn new(config: EngineConfig, slot: Arc<dyn KvSlot>) -> (Self, EngineHandle) {
        let snapshots = SnapshotStore::new(slot)
            .with_retention(config.retention)
            .with_capacity(config.capacity);
        let restored = snapshots.load();
        if !restored.is_empty() {
            info!(count = restored.len(), "restored notification history");
        }

        let store = NotificationStore::with_entries(config.capacity, restored);
        let aggregator = ClusterAggregator::new()
            .with_idle_window(config.idle_window)
            .with_max_events(config.max_cluster_events);
        let presenter = PresentationController::new(config.preview_duration);

        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            config,
            store,
            aggregator,
            presenter,
            router: DeliveryRouter::new(),
            snapshots,
            sound_prefs: SoundPrefs::default(),
            avatar: None,
            rx,
            seq: 0,
        };
        (engine, EngineHandle { tx })
    }

    /// 设置投递路由器
    pub fn with_router(mut self, router: DeliveryRouter) -> Self {
        self.router = router;
        self
    }

    /// 设置头像解析协作方
    pub fn with_avatar_resolver(mut self, resolver: Arc<dyn AvatarResolver>) -> Self {
        self.avatar = Some(resolver);
        self
    }

    /// 设置初始声音偏好
    pub fn with_sound_prefs(mut self, prefs: SoundPrefs) -> Self {
        self.sound_prefs = prefs;
        self
    }

    /// 运行引擎直到停机
    pub async fn run(mut self) {
        loop {
            let deadline = match (self.aggregator.next_deadline(), self.presenter.next_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(EngineCommand::Shutdown(ack)) => {
                        self.teardown();
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    // 所有句柄已丢弃，视同停机
                    None => {
                        self.teardown();
                        break;
                    }
                },
                _ = sleep_until_opt(deadline) => self.on_tick(Instant::now()),
            }
        }
        debug!("notification engine stopped");
    }

    async fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Ingest(IngestedEvent::Direct(mut notification)) => {
                self.enrich(&mut notification).await;
                self.insert_and_dispatch(notification);
            }
            EngineCommand::Ingest(IngestedEvent::Clusterable(category, event)) => {
                self.aggregator.accumulate_at(category, event, Instant::now());
            }
            EngineCommand::MarkRead(id) => {
                if self.store.mark_read(&id) {
                    self.persist();
                }
            }
            EngineCommand::MarkAllRead => {
                if self.store.mark_all_read() > 0 {
                    self.persist();
                }
            }
            EngineCommand::Remove(id) => {
                if self.store.remove(&id) {
                    self.persist();
                }
            }
            EngineCommand::ClearAll => {
                self.store.clear();
                self.persist();
            }
            EngineCommand::Activate => self.presenter.on_activate(),
            EngineCommand::Dismiss => self.presenter.on_dismiss(),
            EngineCommand::FlushNow => {
                for flushed in self.aggregator.force_flush_all() {
                    self.insert_flushed(flushed);
                }
            }
            EngineCommand::SetSoundPrefs(prefs) => self.sound_prefs = prefs,
            EngineCommand::Query(reply) => {
                let _ = reply.send(EngineSnapshot {
                    entries: self.store.entries().to_vec(),
                    unread: self.store.unread_count(),
                    panel: self.presenter.state(),
                });
            }
            // Shutdown 在 run 循环里处理
            EngineCommand::Shutdown(_) => {}
        }
    }

    /// 计时到期：flush 到期的聚合状态，推进预览状态机
    fn on_tick(&mut self, now: Instant) {
        for flushed in self.aggregator.take_due(now) {
            self.insert_flushed(flushed);
        }
        self.presenter.on_tick_at(now);
    }

    /// 有界超时内尝试补全私信头像，失败或超时照常发出
    async fn enrich(&self, notification: &mut Notification) {
        let Some(resolver) = &self.avatar else { return };

        if let NotificationPayload::Whisper {
            sender, avatar_url, ..
        } = &mut notification.payload
        {
            if avatar_url.is_none() {
                let pending = resolver.request(sender);
                match tokio::time::timeout(self.config.enrich_timeout, pending).await {
                    Ok(Ok(url)) => *avatar_url = Some(url),
                    _ => debug!(sender = %sender, "avatar enrichment unavailable, emitting without"),
                }
            }
        }
    }

    fn insert_flushed(&mut self, flushed: FlushedCluster) {
        let now = chrono::Utc::now();
        let id = format!("points-{}-{}", now.timestamp_millis(), self.seq);
        self.seq += 1;
        self.insert_and_dispatch(Notification::new(id, now, flushed.into_payload()));
    }

    fn insert_and_dispatch(&mut self, notification: Notification) {
        self.store.insert(notification.clone());
        self.persist();
        self.presenter.on_arrival_at(Instant::now());
        self.router.dispatch(&notification, &self.sound_prefs);
    }

    /// 写穿到持久化槽位（尽力而为）
    fn persist(&self) {
        self.snapshots.save(self.store.entries());
    }

    /// 停机清理：循环已退出（计时作废），强制 flush，再同步保存
    fn teardown(&mut self) {
        for flushed in self.aggregator.force_flush_all() {
            self.insert_flushed(flushed);
        }
        self.snapshots.save(self.store.entries());
    }
}

/// deadline 为 None 时永远挂起，select 只会命中命令分支
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
