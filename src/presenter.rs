//! 面板展示状态机 - 折叠 / 预览 / 展开
//!
//! 无终态的循环状态机，由新通知到达、预览计时到期和用户操作驱动。
//! 与聚合器相同，接口接受显式时间点，预览时长可确定性测试。

use std::time::Duration;

use tokio::time::Instant;

/// 预览自动隐藏的默认时长
pub const DEFAULT_PREVIEW_DURATION: Duration = Duration::from_millis(3000);

/// 面板状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelState {
    /// 完全折叠
    CollapsedIdle,
    /// 折叠但短暂展示最新一条（预览）
    CollapsedPreview,
    /// 用户主动展开
    Expanded,
}

/// 展示控制器
#[derive(Debug)]
pub struct PresentationController {
    state: PanelState,
    preview_duration: Duration,
    /// 预览自动隐藏 deadline，重新武装即替换
    preview_deadline: Option<Instant>,
}

impl PresentationController {
    pub fn new(preview_duration: Duration) -> Self {
        Self {
            state: PanelState::CollapsedIdle,
            preview_duration,
            preview_deadline: None,
        }
    }

    pub fn state(&self) -> PanelState {
        self.state
    }

    /// 新通知到达
    ///
    /// 折叠态进入预览并武装自动隐藏计时；预览中到达则重置计时；
    /// 展开态不受影响（展开视图实时观察存储，无需预览）。
    pub fn on_arrival(&mut self) {
        self.on_arrival_at(Instant::now());
    }

    /// 新通知到达（带时间点，测试用）
    pub fn on_arrival_at(&mut self, now: Instant) {
        match self.state {
            PanelState::CollapsedIdle | PanelState::CollapsedPreview => {
                self.state = PanelState::CollapsedPreview;
                self.preview_deadline = Some(now + self.preview_duration);
            }
            PanelState::Expanded => {}
        }
    }

    /// 用户激活面板控件，取消任何待触发的预览计时
    pub fn on_activate(&mut self) {
        self.state = PanelState::Expanded;
        self.preview_deadline = None;
    }

    /// 用户关闭展开面板（点击外部或显式关闭）
    pub fn on_dismiss(&mut self) {
        if self.state == PanelState::Expanded {
            self.state = PanelState::CollapsedIdle;
        }
    }

    /// 计时触发，返回状态是否发生变化
    ///
    /// 预览 deadline 未到期或已被取消时是保证的 no-op，
    /// 迟到的计时回调不会复活已离开的状态。
    pub fn on_tick_at(&mut self, now: Instant) -> bool {
        match (self.state, self.preview_deadline) {
            (PanelState::CollapsedPreview, Some(deadline)) if deadline <= now => {
                self.state = PanelState::CollapsedIdle;
                self.preview_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// 待触发的预览 deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            PanelState::CollapsedPreview => self.preview_deadline,
            _ => None,
        }
    }
}

impl Default for PresentationController {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_DURATION)
    }
}
