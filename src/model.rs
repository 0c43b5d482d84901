//! 通知数据模型 - 规范化的通知记录与各类型负载
//!
//! 所有入站事件最终都归一化为 `Notification`。payload 是封闭的
//! tagged enum，新增通知类型时由编译器强制补全所有 match 分支，
//! 而不是运行时的 if/else 链。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// 关注的主播开播
    Live,
    /// 收到私信
    Whisper,
    /// 客户端有新版本
    Update,
    /// Drops 掉落已领取
    Drops,
    /// 获得频道积分
    ChannelPoints,
    /// 解锁徽章
    Badge,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Live => "live",
            NotificationKind::Whisper => "whisper",
            NotificationKind::Update => "update",
            NotificationKind::Drops => "drops",
            NotificationKind::ChannelPoints => "channel_points",
            NotificationKind::Badge => "badge",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 徽章状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeStatus {
    New,
    Available,
    ComingSoon,
}

/// 积分分组 - 按频道名（无频道时按原因码）聚合后的一组子事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsGroup {
    /// 分组键（频道名或原因码）
    pub key: String,
    /// 该组累计积分
    pub magnitude: i64,
    /// 该组包含的子事件数
    pub events: usize,
}

/// 类型相关负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum NotificationPayload {
    /// 开播通知
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
        /// 测试推送标记（不触发真实跳转）
        #[serde(default)]
        is_test: bool,
    },
    /// 私信通知
    Whisper {
        sender: String,
        #[serde(default)]
        avatar_url: Option<String>,
        message: String,
        conversation_id: String,
    },
    /// 版本更新通知
    Update {
        current_version: String,
        latest_version: String,
    },
    /// Drops 领取通知
    Drops {
        drop_id: String,
        benefit: String,
        #[serde(default)]
        reward_image: Option<String>,
    },
    /// 频道积分汇总通知（由聚合器 flush 产生）
    ChannelPoints {
        /// 累计积分总量
        total: i64,
        /// 按来源分组的明细（按积分降序、键名升序排列）
        groups: Vec<PointsGroup>,
        /// 人类可读的汇总文本
        summary: String,
    },
    /// 徽章通知
    Badge {
        badge_id: String,
        status: BadgeStatus,
        #[serde(default)]
        date: Option<String>,
    },
}

impl NotificationPayload {
    /// 负载对应的通知类型
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationPayload::Live { .. } => NotificationKind::Live,
            NotificationPayload::Whisper { .. } => NotificationKind::Whisper,
            NotificationPayload::Update { .. } => NotificationKind::Update,
            NotificationPayload::Drops { .. } => NotificationKind::Drops,
            NotificationPayload::ChannelPoints { .. } => NotificationKind::ChannelPoints,
            NotificationPayload::Badge { .. } => NotificationKind::Badge,
        }
    }
}

/// 规范化通知记录
///
/// `id` 在单个存储实例内唯一。对同类事件使用确定性 id
/// （如 `whisper-<conversation>`），重复投递会落到 upsert 路径。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// 唯一标识，生命周期内稳定
    pub id: String,
    /// 创建时刻（线上格式为 epoch 毫秒）
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// 已读标记
    #[serde(default)]
    pub read: bool,
    #[serde(flatten)]
    pub payload: NotificationPayload,
}

impl Notification {
    /// 创建未读通知
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, payload: NotificationPayload) -> Self {
        Self {
            id: id.into(),
            timestamp,
            read: false,
            payload,
        }
    }

    /// 通知类型
    pub fn kind(&self) -> NotificationKind {
        self.payload.kind()
    }

    /// 单行展示文本（CLI 与日志用）
    pub fn brief(&self) -> String {
        match &self.payload {
            NotificationPayload::Live { streamer, game, .. } => match game {
                Some(game) => format!("🔴 {} 开播了: {}", streamer, game),
                None => format!("🔴 {} 开播了", streamer),
            },
            NotificationPayload::Whisper { sender, message, .. } => {
                format!("💬 {}: {}", sender, message)
            }
            NotificationPayload::Update {
                current_version,
                latest_version,
            } => format!("⬆️ 新版本可用: {} -> {}", current_version, latest_version),
            NotificationPayload::Drops { benefit, .. } => {
                format!("🎁 已领取掉落奖励: {}", benefit)
            }
            NotificationPayload::ChannelPoints { summary, .. } => summary.clone(),
            NotificationPayload::Badge { badge_id, status, .. } => match status {
                BadgeStatus::New => format!("🏅 解锁新徽章: {}", badge_id),
                BadgeStatus::Available => format!("🏅 徽章可领取: {}", badge_id),
                BadgeStatus::ComingSoon => format!("🏅 徽章即将上线: {}", badge_id),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whisper(id: &str) -> Notification {
        Notification::new(
            id,
            Utc::now(),
            NotificationPayload::Whisper {
                sender: "streamfan42".to_string(),
                avatar_url: None,
                message: "gg".to_string(),
                conversation_id: "conv-1".to_string(),
            },
        )
    }

    #[test]
    fn test_kind_matches_payload() {
        assert_eq!(whisper("w1").kind(), NotificationKind::Whisper);

        let live = Notification::new(
            "live-1",
            Utc::now(),
            NotificationPayload::Live {
                streamer: "mango".to_string(),
                avatar_url: None,
                game: None,
                game_image: None,
                title: None,
                is_test: false,
            },
        );
        assert_eq!(live.kind(), NotificationKind::Live);
    }

    #[test]
    fn test_serialization_round_trip() {
        let n = whisper("whisper-conv-1");
        let json = serde_json::to_string(&n).unwrap();
        let parsed: Notification = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, "whisper-conv-1");
        assert_eq!(parsed.kind(), NotificationKind::Whisper);
        assert!(!parsed.read);
    }

    #[test]
    fn test_timestamp_serialized_as_epoch_millis() {
        let n = whisper("w1");
        let value: serde_json::Value = serde_json::to_value(&n).unwrap();
        assert!(value["timestamp"].is_i64());
        assert_eq!(value["timestamp"].as_i64().unwrap(), n.timestamp.timestamp_millis());
    }

    #[test]
    fn test_missing_read_defaults_to_false() {
        // 旧快照里没有 read 字段，反序列化应默认未读
        let json = r#"{"id":"update","timestamp":1700000000000,"kind":"update","data":{"current_version":"1.0.0","latest_version":"1.1.0"}}"#;
        let parsed: Notification = serde_json::from_str(json).unwrap();
        assert!(!parsed.read);
        assert_eq!(parsed.kind(), NotificationKind::Update);
    }

    #[test]
    fn test_kind_tag_is_snake_case() {
        let n = Notification::new(
            "points-1",
            Utc::now(),
            NotificationPayload::ChannelPoints {
                total: 35,
                groups: vec![],
                summary: "✨ 共获得 35 点频道积分".to_string(),
            },
        );
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains(r#""kind":"channel_points""#));
    }

    #[test]
    fn test_badge_status_serialization() {
        let json = serde_json::to_string(&BadgeStatus::ComingSoon).unwrap();
        assert_eq!(json, r#""coming_soon""#);
    }

    #[test]
    fn test_brief_lines() {
        assert!(whisper("w1").brief().contains("streamfan42"));

        let drop = Notification::new(
            "drop-d1",
            Utc::now(),
            NotificationPayload::Drops {
                drop_id: "d1".to_string(),
                benefit: "Emote Pack".to_string(),
                reward_image: None,
            },
        );
        assert!(drop.brief().contains("Emote Pack"));
    }
}
