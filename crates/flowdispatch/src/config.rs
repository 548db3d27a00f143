use chrono::Duration;

/// Coordinator tuning
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Minimum age of the last durable `last_seen` write before another is made.
    pub last_seen_debounce: Duration,
    /// Backoff applied when a node reports it cannot run without a duration.
    pub default_cannot_run: Duration,
    /// Longest backoff a node may request; larger requests are capped.
    pub max_cannot_run: Duration,
    /// Runner count for nodes that register without suggesting one.
    pub default_flow_runners: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            last_seen_debounce: Duration::minutes(5),
            default_cannot_run: Duration::seconds(60),
            max_cannot_run: Duration::days(7),
            default_flow_runners: 1,
        }
    }
}
