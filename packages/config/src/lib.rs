// ABOUTME: Runtime configuration for Kiln loaded from environment variables
// ABOUTME: Applies defaults and range validation, falling back with a warning on bad values

pub mod constants;

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://kiln.db?mode=rwc";
pub const DEFAULT_E2B_API_URL: &str = "https://api.e2b.dev";
pub const DEFAULT_E2B_DOMAIN: &str = "e2b.app";
pub const DEFAULT_SANDBOX_TEMPLATE: &str = "vibe-nextjs-project-krishna-3";
/// E2B caps sandbox lifetime at one hour
pub const DEFAULT_SANDBOX_TTL_MINUTES: u64 = 60;
pub const DEFAULT_PREVIEW_PORT: u16 = 3000;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AGENT_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_SOFT_ITERATION_LIMIT: u32 = 12;
pub const DEFAULT_MAX_ITERATIONS: u32 = 15;
pub const DEFAULT_MAINTENANCE_INTERVAL_MINUTES: u64 = 10;
pub const DEFAULT_MAINTENANCE_BATCH_SIZE: u32 = 20;
pub const DEFAULT_JOB_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_HTTP_REQUEST_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilnConfig {
    pub database_url: String,

    // Sandbox provider
    pub e2b_api_key: Option<String>,
    pub e2b_api_url: String,
    pub e2b_domain: String,

    // Sandbox lifecycle
    pub sandbox_template: String,
    pub sandbox_ttl_minutes: u64,
    pub preview_port: u16,

    // Agent
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub agent_model: String,
    pub soft_iteration_limit: u32,
    pub max_iterations: u32,

    // Maintenance
    pub maintenance_interval_minutes: u64,
    pub maintenance_batch_size: u32,

    // Jobs
    pub job_retry_attempts: u32,

    // HTTP
    pub http_request_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            e2b_api_key: None,
            e2b_api_url: DEFAULT_E2B_API_URL.to_string(),
            e2b_domain: DEFAULT_E2B_DOMAIN.to_string(),
            sandbox_template: DEFAULT_SANDBOX_TEMPLATE.to_string(),
            sandbox_ttl_minutes: DEFAULT_SANDBOX_TTL_MINUTES,
            preview_port: DEFAULT_PREVIEW_PORT,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            agent_model: DEFAULT_AGENT_MODEL.to_string(),
            soft_iteration_limit: DEFAULT_SOFT_ITERATION_LIMIT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            maintenance_interval_minutes: DEFAULT_MAINTENANCE_INTERVAL_MINUTES,
            maintenance_batch_size: DEFAULT_MAINTENANCE_BATCH_SIZE,
            job_retry_attempts: DEFAULT_JOB_RETRY_ATTEMPTS,
            http_request_timeout_secs: DEFAULT_HTTP_REQUEST_TIMEOUT_SECS,
            http_connect_timeout_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl KilnConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string_or = |name: &str, default: String| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        let secret = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let max_iterations = parse_in_range(
            &lookup,
            constants::KILN_MAX_ITERATIONS,
            1..=100,
            defaults.max_iterations,
        );
        let mut soft_iteration_limit = parse_in_range(
            &lookup,
            constants::KILN_SOFT_ITERATION_LIMIT,
            1..=100,
            defaults.soft_iteration_limit,
        );
        if soft_iteration_limit > max_iterations {
            warn!(
                "{} ({}) exceeds {} ({}), clamping",
                constants::KILN_SOFT_ITERATION_LIMIT,
                soft_iteration_limit,
                constants::KILN_MAX_ITERATIONS,
                max_iterations
            );
            soft_iteration_limit = max_iterations;
        }

        Self {
            database_url: string_or(constants::KILN_DATABASE_URL, defaults.database_url),
            e2b_api_key: secret(constants::E2B_API_KEY),
            e2b_api_url: string_or(constants::E2B_API_URL, defaults.e2b_api_url),
            e2b_domain: string_or(constants::E2B_DOMAIN, defaults.e2b_domain),
            sandbox_template: string_or(
                constants::KILN_SANDBOX_TEMPLATE,
                defaults.sandbox_template,
            ),
            sandbox_ttl_minutes: parse_in_range(
                &lookup,
                constants::KILN_SANDBOX_TTL_MINUTES,
                1..=24 * 60,
                defaults.sandbox_ttl_minutes,
            ),
            preview_port: parse_in_range(
                &lookup,
                constants::KILN_PREVIEW_PORT,
                1..=u16::MAX,
                defaults.preview_port,
            ),
            openai_api_key: secret(constants::OPENAI_API_KEY),
            openai_base_url: string_or(constants::OPENAI_BASE_URL, defaults.openai_base_url),
            agent_model: string_or(constants::KILN_AGENT_MODEL, defaults.agent_model),
            soft_iteration_limit,
            max_iterations,
            maintenance_interval_minutes: parse_in_range(
                &lookup,
                constants::KILN_MAINTENANCE_INTERVAL_MINUTES,
                1..=24 * 60,
                defaults.maintenance_interval_minutes,
            ),
            maintenance_batch_size: parse_in_range(
                &lookup,
                constants::KILN_MAINTENANCE_BATCH_SIZE,
                1..=500,
                defaults.maintenance_batch_size,
            ),
            job_retry_attempts: parse_in_range(
                &lookup,
                constants::KILN_JOB_RETRY_ATTEMPTS,
                1..=10,
                defaults.job_retry_attempts,
            ),
            http_request_timeout_secs: parse_in_range(
                &lookup,
                constants::KILN_HTTP_REQUEST_TIMEOUT_SECS,
                1..=3600,
                defaults.http_request_timeout_secs,
            ),
            http_connect_timeout_secs: parse_in_range(
                &lookup,
                constants::KILN_HTTP_CONNECT_TIMEOUT_SECS,
                1..=300,
                defaults.http_connect_timeout_secs,
            ),
        }
    }
}

fn parse_in_range<F, T>(lookup: &F, name: &str, range: RangeInclusive<T>, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if range.contains(&value) => value,
        Ok(value) => {
            warn!(
                "{}={} is outside {}..={}, using default {}",
                name,
                value,
                range.start(),
                range.end(),
                default
            );
            default
        }
        Err(_) => {
            warn!("{}={:?} is not valid, using default {}", name, raw, default);
            default
        }
    }
}
