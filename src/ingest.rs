//! 事件接入 - 订阅外部推送源，校验并归一化原始事件
//!
//! 接入层只做三件事：校验、归一化、把结果交给引擎队列。
//! 它不触碰存储和 UI 状态，用合成事件即可完整测试。
//! 格式错误的事件丢弃并记诊断，摄取永不中断。
//!
//! `subscribe` 返回的句柄是作用域资源：`unsubscribe` 幂等，
//! 句柄 Drop 时自动退订。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cluster::{ClusterCategory, ClusterEvent};
use crate::engine::EngineHandle;
use crate::event::StreamEvent;
use crate::model::{Notification, NotificationPayload};

/// 归一化结果
///
/// 非聚合类型在此处就分配 id 与时间戳；可聚合类型只携带原始
/// 子事件，id 与时间戳在 flush 时才分配。
#[derive(Debug, Clone, PartialEq)]
pub enum IngestedEvent {
    /// 直接进入存储的规范化通知
    Direct(Notification),
    /// 进入聚合器的原始子事件
    Clusterable(ClusterCategory, ClusterEvent),
}

/// 把原始事件归一化为引擎输入
///
/// 确定性 id（`live-<streamer>`、`whisper-<conversation>` 等）
/// 让后端的 at-least-once 重复投递自然落到存储的 upsert 路径。
pub fn normalize(event: StreamEvent, now: DateTime<Utc>) -> Result<IngestedEvent, &'static str> {
    event.validate()?;

    let ingested = match event {
        StreamEvent::Live {
            streamer,
            avatar_url,
            game,
            game_image,
            title,
            is_test,
        } => IngestedEvent::Direct(Notification::new(
            format!("live-{}", streamer),
            now,
            NotificationPayload::Live {
                streamer,
                avatar_url,
                game,
                game_image,
                title,
                is_test,
            },
        )),
        StreamEvent::Whisper {
            sender,
            message,
            conversation_id,
        } => IngestedEvent::Direct(Notification::new(
            format!("whisper-{}", conversation_id),
            now,
            NotificationPayload::Whisper {
                sender,
                avatar_url: None,
                message,
                conversation_id,
            },
        )),
        StreamEvent::Update {
            current_version,
            latest_version,
        } => IngestedEvent::Direct(Notification::new(
            // 更新通知是单例，后到的版本覆盖先到的
            "update",
            now,
            NotificationPayload::Update {
                current_version,
                latest_version,
            },
        )),
        StreamEvent::Drops {
            drop_id,
            benefit,
            reward_image,
        } => IngestedEvent::Direct(Notification::new(
            format!("drop-{}", drop_id),
            now,
            NotificationPayload::Drops {
                drop_id,
                benefit,
                reward_image,
            },
        )),
        StreamEvent::ChannelPoints {
            channel,
            points,
            reason,
            ..
        } => IngestedEvent::Clusterable(
            ClusterCategory::ChannelPoints,
            ClusterEvent {
                channel,
                magnitude: points,
                reason,
                arrived_at: now,
            },
        ),
        StreamEvent::Badge {
            badge_id,
            status,
            date,
        } => IngestedEvent::Direct(Notification::new(
            format!("badge-{}", badge_id),
            now,
            NotificationPayload::Badge {
                badge_id,
                status,
                date,
            },
        )),
    };

    Ok(ingested)
}

/// 事件接入器
pub struct EventIngestor {
    handle: EngineHandle,
    sources: Arc<Mutex<HashSet<String>>>,
}

impl EventIngestor {
    pub fn new(handle: EngineHandle) -> Self {
        Self {
            handle,
            sources: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 订阅一个外部事件源，每个源调用一次
    pub fn subscribe(&self, source_id: impl Into<String>) -> SourceSubscription {
        let source_id = source_id.into();
        {
            let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
            if !sources.insert(source_id.clone()) {
                warn!(source = %source_id, "source already subscribed, handle replaced");
            }
        }

        SourceSubscription {
            source_id,
            handle: self.handle.clone(),
            sources: Arc::clone(&self.sources),
        }
    }

    /// 当前活跃的源数量
    pub fn source_count(&self) -> usize {
        self.sources.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// 单个事件源的订阅句柄
pub struct SourceSubscription {
    source_id: String,
    handle: EngineHandle,
    sources: Arc<Mutex<HashSet<String>>>,
}

impl SourceSubscription {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// 订阅是否仍然活跃
    pub fn is_active(&self) -> bool {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&self.source_id)
    }

    /// 接收一条原始 JSON 事件
    pub fn push_raw(&self, raw: &str) {
        let event: StreamEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(source = %self.source_id, error = %e, "dropping malformed event");
                return;
            }
        };
        self.push(event);
    }

    /// 接收一条已解析事件
    pub fn push(&self, event: StreamEvent) {
        if !self.is_active() {
            debug!(source = %self.source_id, "ignoring event from unsubscribed source");
            return;
        }

        match normalize(event, Utc::now()) {
            Ok(ingested) => {
                if !self.handle.submit(ingested) {
                    debug!(source = %self.source_id, "engine is gone, event dropped");
                }
            }
            Err(reason) => {
                warn!(source = %self.source_id, reason, "dropping invalid event");
            }
        }
    }

    /// 退订（幂等）
    pub fn unsubscribe(&mut self) {
        self.unsubscribe_inner();
    }

    fn unsubscribe_inner(&self) {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.source_id);
    }
}

impl Drop for SourceSubscription {
    fn drop(&mut self) {
        self.unsubscribe_inner();
    }
}
