//! 积分聚合器 - 将高频同类事件在空闲窗口内合并为单条通知
//!
//! 每个可聚合类别持有一份瞬态 `ClusterState`：窗口内首个事件创建它，
//! 后续事件累加积分并重置唯一的空闲 deadline（替换而非叠加），
//! flush 时产出恰好一条通知并清空状态。
//!
//! 所有接口都接受显式时间点，引擎传真实时钟，测试传构造的
//! Instant，窗口行为因此可以完全确定地验证。

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::model::{NotificationPayload, PointsGroup};

/// 默认空闲窗口
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_millis(3000);

/// 单个 cluster 保留的原始子事件上限
pub const MAX_CONTRIBUTING_EVENTS: usize = 50;

/// 无频道也无原因码时的分组键
const FALLBACK_GROUP_KEY: &str = "unknown";

/// 可聚合类别（封闭集合，目前只有频道积分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterCategory {
    ChannelPoints,
}

/// 原始积分子事件
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEvent {
    /// 来源频道
    pub channel: Option<String>,
    /// 积分变动量
    pub magnitude: i64,
    /// 原因码（无频道身份时作为分组键）
    pub reason: Option<String>,
    /// 到达时刻
    pub arrived_at: DateTime<Utc>,
}

impl ClusterEvent {
    /// 分组键：频道名优先，其次原因码
    fn group_key(&self) -> &str {
        match (&self.channel, &self.reason) {
            (Some(channel), _) if !channel.trim().is_empty() => channel,
            (_, Some(reason)) if !reason.trim().is_empty() => reason,
            _ => FALLBACK_GROUP_KEY,
        }
    }
}

/// 每类别的瞬态聚合状态
#[derive(Debug)]
struct ClusterState {
    /// 累计积分
    total: i64,
    /// 按键聚合的 (积分, 子事件数)，每个子事件恰好计入一组
    groups: HashMap<String, (i64, usize)>,
    /// 原始子事件（有界，仅保留明细）
    events: Vec<ClusterEvent>,
    /// 唯一的待 flush deadline，重新武装即整体替换
    deadline: Instant,
}

/// flush 产物，恰好对应一条通知
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedCluster {
    pub category: ClusterCategory,
    /// 累计积分总量
    pub total: i64,
    /// 分组明细（积分降序，键名升序打平手）
    pub groups: Vec<PointsGroup>,
    /// 确定性的汇总文本
    pub summary: String,
}

impl FlushedCluster {
    /// 转为通知负载
    pub fn into_payload(self) -> NotificationPayload {
        match self.category {
            ClusterCategory::ChannelPoints => NotificationPayload::ChannelPoints {
                total: self.total,
                groups: self.groups,
                summary: self.summary,
            },
        }
    }
}

/// 积分聚合器
pub struct ClusterAggregator {
    idle_window: Duration,
    max_events: usize,
    clusters: HashMap<ClusterCategory, ClusterState>,
}

impl ClusterAggregator {
    /// 创建聚合器，使用默认 3 秒空闲窗口
    pub fn new() -> Self {
        Self {
            idle_window: DEFAULT_IDLE_WINDOW,
            max_events: MAX_CONTRIBUTING_EVENTS,
            clusters: HashMap::new(),
        }
    }

    /// 设置空闲窗口时长
    pub fn with_idle_window(mut self, window: Duration) -> Self {
        self.idle_window = window;
        self
    }

    /// 设置原始子事件上限
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events.max(1);
        self
    }

    /// 累加事件
    pub fn accumulate(&mut self, category: ClusterCategory, event: ClusterEvent) {
        self.accumulate_at(category, event, Instant::now());
    }

    /// 累加事件（带时间点，测试用）
    ///
    /// 每次累加都把该类别的 deadline 重置为 `now + idle_window`，
    /// 旧的 deadline 被替换，同一类别永远只有一个待触发计时。
    pub fn accumulate_at(&mut self, category: ClusterCategory, event: ClusterEvent, now: Instant) {
        let deadline = now + self.idle_window;
        let state = self.clusters.entry(category).or_insert_with(|| ClusterState {
            total: 0,
            groups: HashMap::new(),
            events: Vec::new(),
            deadline,
        });

        state.total += event.magnitude;
        let group = state.groups.entry(event.group_key().to_string()).or_insert((0, 0));
        group.0 += event.magnitude;
        group.1 += 1;

        // 原始明细有界，超出后只丢明细，总量与分组不受影响
        if state.events.len() < self.max_events {
            state.events.push(event);
        }

        state.deadline = deadline;
    }

    /// 最近的待触发 deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.clusters.values().map(|state| state.deadline).min()
    }

    /// 取走所有到期类别的 flush 产物
    pub fn take_due(&mut self, now: Instant) -> Vec<FlushedCluster> {
        let due: Vec<ClusterCategory> = self
            .clusters
            .iter()
            .filter(|(_, state)| state.deadline <= now)
            .map(|(category, _)| *category)
            .collect();

        due.into_iter().filter_map(|category| self.flush(category)).collect()
    }

    /// flush 指定类别
    ///
    /// 产出恰好一条通知的原料并清空该类别状态；类别不存在时为 no-op。
    pub fn flush(&mut self, category: ClusterCategory) -> Option<FlushedCluster> {
        let state = self.clusters.remove(&category)?;
        Some(Self::build_flush(category, state))
    }

    /// 强制 flush 所有非空类别（停机或外部 flush 请求）
    pub fn force_flush_all(&mut self) -> Vec<FlushedCluster> {
        let categories: Vec<ClusterCategory> = self.clusters.keys().copied().collect();
        categories
            .into_iter()
            .filter_map(|category| self.flush(category))
            .collect()
    }

    /// 是否没有待 flush 的状态
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    fn build_flush(category: ClusterCategory, state: ClusterState) -> FlushedCluster {
        let mut groups: Vec<PointsGroup> = state
            .groups
            .into_iter()
            .map(|(key, (magnitude, events))| PointsGroup {
                key,
                magnitude,
                events,
            })
            .collect();
        // 积分降序，键名升序打平手，保证汇总文本确定
        groups.sort_by(|a, b| b.magnitude.cmp(&a.magnitude).then_with(|| a.key.cmp(&b.key)));

        let detail: Vec<String> = groups
            .iter()
            .map(|group| format!("{} {:+}", group.key, group.magnitude))
            .collect();
        let summary = format!("✨ 共获得 {} 点频道积分 ({})", state.total, detail.join(", "));

        FlushedCluster {
            category,
            total: state.total,
            groups,
            summary,
        }
    }
}

impl Default for ClusterAggregator {
    fn default() -> Self {
        Self::new()
    }
}
