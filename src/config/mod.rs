use crate::models::TimeRange;
use crate::reconcile::MatchTolerance;
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Remote history API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay of the exponential retry backoff.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// Sent as `Authorization: Bearer …` when set.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// Path of each metric family's endpoint, relative to `base_url`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    #[serde(default = "default_price_endpoint")]
    pub price: String,

    #[serde(default = "default_sales_rank_endpoint")]
    pub sales_rank: String,

    #[serde(default = "default_rating_endpoint")]
    pub rating: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceMode {
    #[default]
    CalendarDay,
    Window,
    Exact,
}

/// Merge and view settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChartConfig {
    #[serde(default)]
    pub tolerance: ToleranceMode,

    /// Only used with `tolerance = "window"`.
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,

    #[serde(default = "default_close_up_fraction")]
    pub close_up_fraction: f64,
}

/// Fetch-cycle behaviour of an interactive chart session
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_marketplace_id")]
    pub marketplace_id: u32,

    #[serde(default)]
    pub range: TimeRange,

    /// Minimum time a range transition stays in the refreshing state.
    #[serde(default = "default_min_transition_ms")]
    pub min_transition_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://api.optisage.ai/api".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    "optisage-charts/0.1".to_string()
}
fn default_price_endpoint() -> String {
    "products/price-history".to_string()
}
fn default_sales_rank_endpoint() -> String {
    "products/sales-rank".to_string()
}
fn default_rating_endpoint() -> String {
    "products/ratings".to_string()
}
fn default_window_hours() -> i64 {
    24
}
fn default_close_up_fraction() -> f64 {
    0.25
}
fn default_marketplace_id() -> u32 {
    1
}
fn default_min_transition_ms() -> u64 {
    150
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            user_agent: default_user_agent(),
            endpoints: EndpointConfig::default(),
            bearer_token: None,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            price: default_price_endpoint(),
            sales_rank: default_sales_rank_endpoint(),
            rating: default_rating_endpoint(),
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            tolerance: ToleranceMode::default(),
            window_hours: default_window_hours(),
            close_up_fraction: default_close_up_fraction(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            marketplace_id: default_marketplace_id(),
            range: TimeRange::default(),
            min_transition_ms: default_min_transition_ms(),
        }
    }
}

impl ChartConfig {
    pub fn match_tolerance(&self) -> MatchTolerance {
        match self.tolerance {
            ToleranceMode::CalendarDay => MatchTolerance::CalendarDay,
            ToleranceMode::Window => MatchTolerance::Window(Duration::hours(self.window_hours.max(1))),
            ToleranceMode::Exact => MatchTolerance::Exact,
        }
    }

    /// Fraction clamped to (0, 1].
    pub fn close_up_fraction(&self) -> f64 {
        if self.close_up_fraction.is_finite() && self.close_up_fraction > 0.0 {
            self.close_up_fraction.min(1.0)
        } else {
            default_close_up_fraction()
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("OPTISAGE").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [api]
                base_url = "http://localhost:9000"

                [chart]
                tolerance = "window"
                window_hours = 12
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.api.base_url, "http://localhost:9000");
        assert_eq!(cfg.api.max_retries, 3);
        assert_eq!(cfg.api.endpoints.price, "products/price-history");
        assert_eq!(cfg.chart.match_tolerance(), MatchTolerance::Window(Duration::hours(12)));
        assert_eq!(cfg.session.range, TimeRange::Month);
    }

    #[test]
    fn test_close_up_fraction_is_clamped() {
        let mut chart = ChartConfig::default();
        assert_eq!(chart.close_up_fraction(), 0.25);
        chart.close_up_fraction = 3.0;
        assert_eq!(chart.close_up_fraction(), 1.0);
        chart.close_up_fraction = -1.0;
        assert_eq!(chart.close_up_fraction(), 0.25);
    }
}
