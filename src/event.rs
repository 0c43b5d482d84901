//! 入站事件契约 - 后端进程推送的原始事件
//!
//! 线上格式为 `{kind, payload}` 的 tagged union，每种 kind 的
//! payload 形状固定。缺少必填字段的事件在反序列化阶段即失败，
//! 由接入层丢弃并记录诊断，绝不中断摄取。

use serde::{Deserialize, Serialize};

use crate::model::{BadgeStatus, NotificationKind};

/// 原始推送事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    /// 主播开播
    Live {
        streamer: String,
        #[serde(default)]
        avatar_url: Option<String>,
        #[serde(default)]
        game: Option<String>,
        #[serde(default)]
        game_image: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        is_test: bool,
    },
    /// 收到私信
    Whisper {
        sender: String,
        message: String,
        conversation_id: String,
    },
    /// 版本更新可用
    Update {
        current_version: String,
        latest_version: String,
    },
    /// Drops 掉落已领取
    Drops {
        drop_id: String,
        benefit: String,
        #[serde(default)]
        reward_image: Option<String>,
    },
    /// 频道积分变动
    ChannelPoints {
        #[serde(default)]
        channel: Option<String>,
        points: i64,
        #[serde(default)]
        reason: Option<String>,
        /// 变动后的余额（仅透传，引擎不依赖）
        #[serde(default)]
        balance: Option<i64>,
    },
    /// 徽章状态变化
    Badge {
        badge_id: String,
        status: BadgeStatus,
        #[serde(default)]
        date: Option<String>,
    },
}

impl StreamEvent {
    /// 事件对应的通知类型
    pub fn kind(&self) -> NotificationKind {
        match self {
            StreamEvent::Live { .. } => NotificationKind::Live,
            StreamEvent::Whisper { .. } => NotificationKind::Whisper,
            StreamEvent::Update { .. } => NotificationKind::Update,
            StreamEvent::Drops { .. } => NotificationKind::Drops,
            StreamEvent::ChannelPoints { .. } => NotificationKind::ChannelPoints,
            StreamEvent::Badge { .. } => NotificationKind::Badge,
        }
    }

    /// 是否属于需要聚合的类型（目前只有频道积分）
    pub fn is_clusterable(&self) -> bool {
        matches!(self, StreamEvent::ChannelPoints { .. })
    }

    /// 语义校验
    ///
    /// serde 已保证必填字段存在，这里再拒绝空白的标识字段。
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            StreamEvent::Live { streamer, .. } => {
                if streamer.trim().is_empty() {
                    return Err("live event missing streamer");
                }
            }
            StreamEvent::Whisper {
                sender,
                conversation_id,
                ..
            } => {
                if sender.trim().is_empty() {
                    return Err("whisper event missing sender");
                }
                if conversation_id.trim().is_empty() {
                    return Err("whisper event missing conversation_id");
                }
            }
            StreamEvent::Update {
                current_version,
                latest_version,
            } => {
                if current_version.trim().is_empty() || latest_version.trim().is_empty() {
                    return Err("update event missing version");
                }
            }
            StreamEvent::Drops { drop_id, .. } => {
                if drop_id.trim().is_empty() {
                    return Err("drops event missing drop_id");
                }
            }
            StreamEvent::ChannelPoints { .. } => {}
            StreamEvent::Badge { badge_id, .. } => {
                if badge_id.trim().is_empty() {
                    return Err("badge event missing badge_id");
                }
            }
        }
        Ok(())
    }
}

/// 便捷构造函数
impl StreamEvent {
    /// 创建开播事件
    pub fn live(streamer: impl Into<String>) -> Self {
        StreamEvent::Live {
            streamer: streamer.into(),
            avatar_url: None,
            game: None,
            game_image: None,
            title: None,
            is_test: false,
        }
    }

    /// 创建私信事件
    pub fn whisper(
        sender: impl Into<String>,
        message: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        StreamEvent::Whisper {
            sender: sender.into(),
            message: message.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// 创建版本更新事件
    pub fn update(current: impl Into<String>, latest: impl Into<String>) -> Self {
        StreamEvent::Update {
            current_version: current.into(),
            latest_version: latest.into(),
        }
    }

    /// 创建掉落事件
    pub fn drops(drop_id: impl Into<String>, benefit: impl Into<String>) -> Self {
        StreamEvent::Drops {
            drop_id: drop_id.into(),
            benefit: benefit.into(),
            reward_image: None,
        }
    }

    /// 创建频道积分事件
    pub fn channel_points(channel: impl Into<String>, points: i64) -> Self {
        StreamEvent::ChannelPoints {
            channel: Some(channel.into()),
            points,
            reason: None,
            balance: None,
        }
    }

    /// 创建带原因码、无频道身份的积分事件
    pub fn channel_points_reason(reason: impl Into<String>, points: i64) -> Self {
        StreamEvent::ChannelPoints {
            channel: None,
            points,
            reason: Some(reason.into()),
            balance: None,
        }
    }

    /// 创建徽章事件
    pub fn badge(badge_id: impl Into<String>, status: BadgeStatus) -> Self {
        StreamEvent::Badge {
            badge_id: badge_id.into(),
            status,
            date: None,
        }
    }

    /// 设置开播游戏名（链式调用）
    pub fn with_game(mut self, name: impl Into<String>) -> Self {
        if let StreamEvent::Live { game, .. } = &mut self {
            *game = Some(name.into());
        }
        self
    }

    /// 设置积分原因码（链式调用）
    pub fn with_reason(mut self, code: impl Into<String>) -> Self {
        if let StreamEvent::ChannelPoints { reason, .. } = &mut self {
            *reason = Some(code.into());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_round_trip() {
        let event = StreamEvent::live("mango").with_game("Factory Game");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"live""#));
        assert!(json.contains(r#""payload""#));

        let parsed: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_missing_required_field_fails_to_parse() {
        // whisper 缺少 conversation_id
        let json = r#"{"kind":"whisper","payload":{"sender":"bob","message":"hi"}}"#;
        assert!(serde_json::from_str::<StreamEvent>(json).is_err());
    }

    #[test]
    fn test_unknown_kind_fails_to_parse() {
        let json = r#"{"kind":"raid","payload":{}}"#;
        assert!(serde_json::from_str::<StreamEvent>(json).is_err());
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{"kind":"channel_points","payload":{"points":50}}"#;
        let parsed: StreamEvent = serde_json::from_str(json).unwrap();
        match parsed {
            StreamEvent::ChannelPoints {
                channel,
                points,
                reason,
                balance,
            } => {
                assert_eq!(points, 50);
                assert!(channel.is_none());
                assert!(reason.is_none());
                assert!(balance.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_only_channel_points_is_clusterable() {
        assert!(StreamEvent::channel_points("mango", 10).is_clusterable());
        assert!(!StreamEvent::live("mango").is_clusterable());
        assert!(!StreamEvent::whisper("a", "hi", "c1").is_clusterable());
        assert!(!StreamEvent::update("1.0", "1.1").is_clusterable());
        assert!(!StreamEvent::drops("d1", "emote").is_clusterable());
        assert!(!StreamEvent::badge("b1", BadgeStatus::New).is_clusterable());
    }

    #[test]
    fn test_validate_rejects_blank_identity() {
        assert!(StreamEvent::live("  ").validate().is_err());
        assert!(StreamEvent::whisper("", "hi", "c1").validate().is_err());
        assert!(StreamEvent::whisper("bob", "hi", " ").validate().is_err());
        assert!(StreamEvent::drops("", "emote").validate().is_err());
        assert!(StreamEvent::badge("", BadgeStatus::New).validate().is_err());

        assert!(StreamEvent::live("mango").validate().is_ok());
        // 无频道身份的积分事件是合法的（按原因码分组）
        assert!(StreamEvent::channel_points_reason("watch", 10).validate().is_ok());
    }
}
