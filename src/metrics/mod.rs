use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 简单的指标收集器
#[derive(Debug, Default)]
pub struct Metrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    upstream_attempts: AtomicU64,
    upstream_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录成功请求
    pub fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录失败请求
    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次上游调用
    pub fn record_attempt(&self) {
        self.upstream_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次失败的上游调用（随后会换下一个密钥）
    pub fn record_attempt_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 导出 Prometheus 格式
    pub fn export_prometheus(&self) -> String {
        format!(
            "# HELP gemini_relay_requests_total Total number of chat requests\n\
             # TYPE gemini_relay_requests_total counter\n\
             gemini_relay_requests_total {}\n\
             # HELP gemini_relay_requests_successful Successful chat requests\n\
             # TYPE gemini_relay_requests_successful counter\n\
             gemini_relay_requests_successful {}\n\
             # HELP gemini_relay_requests_failed Failed chat requests\n\
             # TYPE gemini_relay_requests_failed counter\n\
             gemini_relay_requests_failed {}\n\
             # HELP gemini_relay_upstream_attempts_total Outbound calls to the upstream API\n\
             # TYPE gemini_relay_upstream_attempts_total counter\n\
             gemini_relay_upstream_attempts_total {}\n\
             # HELP gemini_relay_upstream_failures_total Outbound calls that failed over to the next key\n\
             # TYPE gemini_relay_upstream_failures_total counter\n\
             gemini_relay_upstream_failures_total {}\n",
            self.total_requests.load(Ordering::Relaxed),
            self.successful_requests.load(Ordering::Relaxed),
            self.failed_requests.load(Ordering::Relaxed),
            self.upstream_attempts.load(Ordering::Relaxed),
            self.upstream_failures.load(Ordering::Relaxed)
        )
    }
}

/// 获取全局指标实例
pub fn global_metrics() -> &'static Arc<Metrics> {
    use once_cell::sync::Lazy;
    static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| Arc::new(Metrics::new()));
    &METRICS
}
