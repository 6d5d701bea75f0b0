/// Tunables for one readiness engine instance.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Name carried on every tracing span of the engine, usually the proxy's object path.
    pub label: String,
    /// Capacity of the status-ready broadcast channel.
    pub status_ready_buffer: usize,
}

impl ReadinessConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn status_ready_buffer(mut self, buffer: usize) -> Self {
        self.status_ready_buffer = buffer;
        self
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            label: "readiness".to_owned(),
            status_ready_buffer: 64,
        }
    }
}
