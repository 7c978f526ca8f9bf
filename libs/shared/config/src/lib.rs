use std::env;
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_MAX_QUERY_DAYS: i64 = 366;
const DEFAULT_FENCE_TTL_SECS: i64 = 30;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub max_query_days: i64,
    pub fence_ttl_secs: i64,
}

/// Tuning knobs consumed by the scheduler services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Longest range, in days, a single slot listing may cover.
    pub max_query_days: i64,
    /// Seconds a window change fence is honoured before others may take it over.
    pub fence_ttl_secs: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_query_days: DEFAULT_MAX_QUERY_DAYS,
            fence_ttl_secs: DEFAULT_FENCE_TTL_SECS,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        // A missing .env file is normal outside local development
        dotenv::dotenv().ok();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            max_query_days: Self::parse_positive(
                "SCHEDULER_MAX_QUERY_DAYS",
                env::var("SCHEDULER_MAX_QUERY_DAYS").ok(),
                DEFAULT_MAX_QUERY_DAYS,
            ),
            fence_ttl_secs: Self::parse_positive(
                "SCHEDULER_FENCE_TTL_SECS",
                env::var("SCHEDULER_FENCE_TTL_SECS").ok(),
                DEFAULT_FENCE_TTL_SECS,
            ),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    fn parse_positive(name: &str, raw: Option<String>, default: i64) -> i64 {
        match raw {
            None => {
                warn!("{} not set, using default of {}", name, default);
                default
            }
            Some(value) => match value.trim().parse::<i64>() {
                Ok(parsed) if parsed > 0 => parsed,
                _ => {
                    warn!("{}={} is not a positive integer, using default", name, value);
                    default
                }
            },
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
    }

    pub fn scheduler(&self) -> SchedulerSettings {
        SchedulerSettings {
            max_query_days: self.max_query_days,
            fence_ttl_secs: self.fence_ttl_secs,
        }
    }
}
