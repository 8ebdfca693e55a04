use std::time::Duration;

/// Tunables of a peer's session runtime.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the remote-session cache is swept. An idle cache entry lives
    /// between one and two intervals.
    pub prune_interval: Duration,
    /// Upper bound for one session RPC, on top of caller cancellation.
    pub rpc_timeout: Duration,
    /// How long the server keeps an idle inbound stream open.
    pub stream_idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prune_interval: Duration::from_secs(60),
            rpc_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(15),
        }
    }
}

impl SessionConfig {
    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }
}
