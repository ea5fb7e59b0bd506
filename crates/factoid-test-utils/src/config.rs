//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use factoid_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// Starts from the defaults with a zero line delay, so paced output does
/// not slow tests down.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .rate_limit(1, 60)
///     .label_format("<{key}> ")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.display.line_delay_ms = 0;
        Self { config }
    }

    pub fn label_format(mut self, format: &str) -> Self {
        self.config.display.label_format = format.to_string();
        self
    }

    pub fn line_delay_ms(mut self, ms: u64) -> Self {
        self.config.display.line_delay_ms = ms;
        self
    }

    pub fn max_lines(mut self, n: usize) -> Self {
        self.config.display.max_lines = n;
        self
    }

    pub fn rate_limit(mut self, count: u32, window_secs: u64) -> Self {
        self.config.triggers.default_rate_limit_count = count;
        self.config.triggers.default_rate_limit_window_secs = window_secs;
        self
    }

    pub fn notice_on_join(mut self, enabled: bool) -> Self {
        self.config.triggers.default_notice_on_join = enabled;
        self
    }

    pub fn max_dot_targets(mut self, n: usize) -> Self {
        self.config.session.max_dot_targets = n;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
