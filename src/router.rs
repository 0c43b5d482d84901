//! 通知投递路由 - 把规范化通知扇出到外部接收器
//!
//! 接收器（toast、系统原生通知、音效）全部是可选的外部协作方，
//! 单个接收器失败只记日志，不影响其余扇出，更不影响存储路径。
//! 声音偏好由宿主提供，路由器只读取，从不持有为自有状态。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Notification, NotificationKind};

/// 单个接收器的投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    /// 已投递
    Sent,
    /// 接收器主动跳过（附原因）
    Skipped(String),
    /// 投递失败（附原因）
    Failed(String),
}

/// 通知接收器 trait
pub trait NotificationSink: Send + Sync {
    /// 接收器名称（日志与结果归属用）
    fn name(&self) -> &str;

    /// 投递一条通知
    fn deliver(&self, notification: &Notification) -> Result<SendResult>;
}

/// 展示方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    /// 顶部灵动岛式横幅
    DynamicIsland,
    /// 应用内 toast
    Toast,
    /// 系统原生通知
    Native,
}

/// 提示音风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundStyle {
    #[default]
    Pop,
    Chime,
    Retro,
}

/// 声音偏好（外部输入，引擎只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundPrefs {
    /// 总开关
    pub master: bool,
    /// 按通知类型的开关，缺省为开
    #[serde(default)]
    pub kinds: HashMap<NotificationKind, bool>,
    /// 按展示方式的开关，缺省为开
    #[serde(default)]
    pub methods: HashMap<DeliveryMethod, bool>,
    /// 提示音风格
    #[serde(default)]
    pub style: SoundStyle,
}

impl SoundPrefs {
    /// 是否应当为该通知播放提示音
    pub fn should_play(&self, kind: NotificationKind, method: DeliveryMethod) -> bool {
        self.master
            && *self.kinds.get(&kind).unwrap_or(&true)
            && *self.methods.get(&method).unwrap_or(&true)
    }

    /// 全部静音
    pub fn silent() -> Self {
        Self {
            master: false,
            ..Self::default()
        }
    }
}

impl Default for SoundPrefs {
    fn default() -> Self {
        Self {
            master: true,
            kinds: HashMap::new(),
            methods: HashMap::new(),
            style: SoundStyle::default(),
        }
    }
}

/// 音效回调
pub type SoundHook = Box<dyn Fn(NotificationKind, SoundStyle) + Send + Sync>;

/// 投递路由器
pub struct DeliveryRouter {
    sinks: Vec<Arc<dyn NotificationSink>>,
    sound_hook: Option<SoundHook>,
    /// 当前展示方式（决定声音偏好中的 per-method 开关取哪一项）
    method: DeliveryMethod,
    dry_run: bool,
}

impl DeliveryRouter {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            sound_hook: None,
            method: DeliveryMethod::Toast,
            dry_run: false,
        }
    }

    /// 设置展示方式
    pub fn with_method(mut self, method: DeliveryMethod) -> Self {
        self.method = method;
        self
    }

    /// 设置音效回调
    pub fn with_sound_hook(mut self, hook: SoundHook) -> Self {
        self.sound_hook = Some(hook);
        self
    }

    /// 设置 dry-run 模式（只记录，不实际投递）
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// 注册接收器
    pub fn register_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        tracing::info!(sink = sink.name(), "registering notification sink");
        self.sinks.push(sink);
    }

    /// 扇出一条通知，按接收器返回各自结果
    ///
    /// 投递全部是尽力而为：接收器报错转为 `Failed` 并继续。
    /// 扇出完成后按声音偏好决定是否触发音效回调。
    pub fn dispatch(&self, notification: &Notification, prefs: &SoundPrefs) -> Vec<(String, SendResult)> {
        let mut results = Vec::with_capacity(self.sinks.len());

        for sink in &self.sinks {
            let name = sink.name().to_string();

            if self.dry_run {
                results.push((name, SendResult::Skipped("dry-run".to_string())));
                continue;
            }

            let result = match sink.deliver(notification) {
                Ok(result) => result,
                Err(e) => {
                    warn!(sink = %name, error = %e, "sink delivery failed");
                    SendResult::Failed(e.to_string())
                }
            };
            results.push((name, result));
        }

        if !self.dry_run {
            if let Some(hook) = &self.sound_hook {
                let kind = notification.kind();
                if prefs.should_play(kind, self.method) {
                    hook(kind, prefs.style);
                }
            }
        }

        results
    }

    /// 已注册接收器数量
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// 已注册接收器名称
    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|sink| sink.name()).collect()
    }
}

impl Default for DeliveryRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NotificationPayload;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 测试用的 mock 接收器
    struct MockSink {
        name: String,
        delivered: AtomicUsize,
    }

    impl MockSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                delivered: AtomicUsize::new(0),
            }
        }

        fn delivered(&self) -> usize {
            self.delivered.load(Ordering::SeqCst)
        }
    }

    impl NotificationSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn deliver(&self, _notification: &Notification) -> Result<SendResult> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(SendResult::Sent)
        }
    }

    /// 总是报错的接收器
    struct BrokenSink;

    impl NotificationSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        fn deliver(&self, _notification: &Notification) -> Result<SendResult> {
            anyhow::bail!("connection refused")
        }
    }

    fn live_notification() -> Notification {
        Notification::new(
            "live-mango",
            Utc::now(),
            NotificationPayload::Live {
                streamer: "mango".to_string(),
                avatar_url: None,
                game: None,
                game_image: None,
                title: None,
                is_test: false,
            },
        )
    }

    #[test]
    fn test_dispatch_fans_out_to_all_sinks() {
        let mut router = DeliveryRouter::new();
        let toast = Arc::new(MockSink::new("toast"));
        let native = Arc::new(MockSink::new("native"));
        router.register_sink(toast.clone());
        router.register_sink(native.clone());

        let results = router.dispatch(&live_notification(), &SoundPrefs::silent());
        assert_eq!(results.len(), 2);
        assert_eq!(toast.delivered(), 1);
        assert_eq!(native.delivered(), 1);
    }

    #[test]
    fn test_failing_sink_does_not_stop_fanout() {
        let mut router = DeliveryRouter::new();
        let toast = Arc::new(MockSink::new("toast"));
        router.register_sink(Arc::new(BrokenSink));
        router.register_sink(toast.clone());

        let results = router.dispatch(&live_notification(), &SoundPrefs::silent());
        assert!(matches!(results[0].1, SendResult::Failed(_)));
        assert_eq!(results[1].1, SendResult::Sent);
        assert_eq!(toast.delivered(), 1);
    }

    #[test]
    fn test_dry_run_skips_sinks() {
        let mut router = DeliveryRouter::new().with_dry_run(true);
        let toast = Arc::new(MockSink::new("toast"));
        router.register_sink(toast.clone());

        let results = router.dispatch(&live_notification(), &SoundPrefs::default());
        assert_eq!(results[0].1, SendResult::Skipped("dry-run".to_string()));
        assert_eq!(toast.delivered(), 0);
    }

    #[test]
    fn test_sound_hook_respects_prefs() {
        let played = Arc::new(AtomicUsize::new(0));
        let counter = played.clone();
        let router = DeliveryRouter::new()
            .with_method(DeliveryMethod::Toast)
            .with_sound_hook(Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        // 默认偏好：播放
        router.dispatch(&live_notification(), &SoundPrefs::default());
        assert_eq!(played.load(Ordering::SeqCst), 1);

        // 总开关关闭：不播放
        router.dispatch(&live_notification(), &SoundPrefs::silent());
        assert_eq!(played.load(Ordering::SeqCst), 1);

        // 按类型关闭
        let mut prefs = SoundPrefs::default();
        prefs.kinds.insert(NotificationKind::Live, false);
        router.dispatch(&live_notification(), &prefs);
        assert_eq!(played.load(Ordering::SeqCst), 1);

        // 按展示方式关闭
        let mut prefs = SoundPrefs::default();
        prefs.methods.insert(DeliveryMethod::Toast, false);
        router.dispatch(&live_notification(), &prefs);
        assert_eq!(played.load(Ordering::SeqCst), 1);

        // 关闭的是其他展示方式：照常播放
        let mut prefs = SoundPrefs::default();
        prefs.methods.insert(DeliveryMethod::Native, false);
        router.dispatch(&live_notification(), &prefs);
        assert_eq!(played.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sink_registry_introspection() {
        let mut router = DeliveryRouter::new();
        assert_eq!(router.sink_count(), 0);

        router.register_sink(Arc::new(MockSink::new("toast")));
        assert_eq!(router.sink_count(), 1);
        assert_eq!(router.sink_names(), vec!["toast"]);
    }
}
