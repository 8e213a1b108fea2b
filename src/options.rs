/// Configures request pacing, HTTP timeouts and live line persistence.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowOptions {
    /// Adjust the post-request delay from server feedback.
    ///
    /// When disabled, transport failures always back off by a static
    /// interval and rate limits never change the delay.
    pub adaptive: bool,
    /// Upper bound for requests per minute (`None` = unlimited).
    pub max_rpm: Option<f64>,
    /// Per-request read timeout in milliseconds.
    pub timeout_ms: u64,
    /// Per-request connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Persist the live status line every N requests.
    pub persist_every: u64,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            adaptive: true,
            max_rpm: None,
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            persist_every: 10,
        }
    }
}

impl FlowOptions {
    /// Disables delay adjustment and progressive backoff.
    pub fn with_static_backoff(mut self) -> Self {
        self.adaptive = false;
        self
    }

    /// Sets the requests-per-minute cap.
    ///
    /// Negative values are clamped to zero and a zero cap disables the limit.
    pub fn with_max_rpm(mut self, max_rpm: f64) -> Self {
        let max_rpm = max_rpm.max(0.0);
        self.max_rpm = (max_rpm.abs() >= 1e-3).then_some(max_rpm);
        self
    }

    /// Reads options from environment variables, starting from defaults.
    ///
    /// Reads:
    /// - `REQUEST_FLOW_STATIC_BACKOFF`: `1`/`true`/`yes` disables adaptive pacing
    /// - `REQUEST_FLOW_MAX_RPM`: requests-per-minute cap, `0` disables it
    /// - `REQUEST_FLOW_TIMEOUT_MS`: per-request read timeout
    /// - `REQUEST_FLOW_PERSIST_EVERY`: live line persistence interval, `0` disables it
    pub fn from_env() -> std::result::Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> std::result::Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(value) = lookup("REQUEST_FLOW_STATIC_BACKOFF") {
            if is_truthy(&value) {
                options.adaptive = false;
            }
        }
        if let Some(value) = lookup("REQUEST_FLOW_MAX_RPM") {
            let max_rpm = value
                .trim()
                .parse::<f64>()
                .map_err(|err| format!("REQUEST_FLOW_MAX_RPM is not a number: {err}"))?;
            options = options.with_max_rpm(max_rpm);
        }
        if let Some(value) = lookup("REQUEST_FLOW_TIMEOUT_MS") {
            options.timeout_ms = value
                .trim()
                .parse::<u64>()
                .map_err(|err| format!("REQUEST_FLOW_TIMEOUT_MS is not an integer: {err}"))?;
        }
        if let Some(value) = lookup("REQUEST_FLOW_PERSIST_EVERY") {
            options.persist_every = value
                .trim()
                .parse::<u64>()
                .map_err(|err| format!("REQUEST_FLOW_PERSIST_EVERY is not an integer: {err}"))?;
        }

        Ok(options)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
