//! Stream Notify Center - 直播客户端的通知聚合与聚类引擎
//!
//! 接收后端进程推送的异构实时事件（开播、私信、版本更新、掉落、
//! 频道积分、徽章），归一化为统一的通知记录，把高频同类事件在
//! 空闲窗口内合并为单条汇总，维护已读/未读与面板预览状态，并把
//! 有界、会过期的历史持久化到键值槽位。
//!
//! 渲染、音频合成和系统 toast 投递都是外部协作方，只消费本引擎
//! 的出站钩子。

pub mod action;
pub mod cluster;
pub mod engine;
pub mod event;
pub mod ingest;
pub mod model;
pub mod persist;
pub mod presenter;
pub mod router;
pub mod store;

pub use action::{resolve_action, ActionRequest, SettingsTab};
pub use cluster::{ClusterAggregator, ClusterCategory, ClusterEvent, FlushedCluster};
pub use engine::{
    AvatarResolver, EngineConfig, EngineHandle, EngineSnapshot, NotificationEngine,
};
pub use event::StreamEvent;
pub use ingest::{normalize, EventIngestor, IngestedEvent, SourceSubscription};
pub use model::{BadgeStatus, Notification, NotificationKind, NotificationPayload, PointsGroup};
pub use persist::{FileSlot, KvSlot, MemorySlot, SnapshotStore};
pub use presenter::{PanelState, PresentationController};
pub use router::{
    DeliveryMethod, DeliveryRouter, NotificationSink, SendResult, SoundPrefs, SoundStyle,
};
pub use store::{InsertOutcome, NotificationStore, MAX_NOTIFICATIONS};
