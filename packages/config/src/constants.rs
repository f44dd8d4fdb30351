// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Kiln

// Database
pub const KILN_DATABASE_URL: &str = "KILN_DATABASE_URL";

// Sandbox Provider (E2B)
pub const E2B_API_KEY: &str = "E2B_API_KEY";
pub const E2B_API_URL: &str = "E2B_API_URL";
pub const E2B_DOMAIN: &str = "E2B_DOMAIN";

// Sandbox Lifecycle
pub const KILN_SANDBOX_TEMPLATE: &str = "KILN_SANDBOX_TEMPLATE";
pub const KILN_SANDBOX_TTL_MINUTES: &str = "KILN_SANDBOX_TTL_MINUTES";
pub const KILN_PREVIEW_PORT: &str = "KILN_PREVIEW_PORT";

// Agent Provider
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const KILN_AGENT_MODEL: &str = "KILN_AGENT_MODEL";
pub const KILN_SOFT_ITERATION_LIMIT: &str = "KILN_SOFT_ITERATION_LIMIT";
pub const KILN_MAX_ITERATIONS: &str = "KILN_MAX_ITERATIONS";

// Maintenance
pub const KILN_MAINTENANCE_INTERVAL_MINUTES: &str = "KILN_MAINTENANCE_INTERVAL_MINUTES";
pub const KILN_MAINTENANCE_BATCH_SIZE: &str = "KILN_MAINTENANCE_BATCH_SIZE";

// Jobs
pub const KILN_JOB_RETRY_ATTEMPTS: &str = "KILN_JOB_RETRY_ATTEMPTS";

// HTTP Client Configuration
pub const KILN_HTTP_REQUEST_TIMEOUT_SECS: &str = "KILN_HTTP_REQUEST_TIMEOUT_SECS";
pub const KILN_HTTP_CONNECT_TIMEOUT_SECS: &str = "KILN_HTTP_CONNECT_TIMEOUT_SECS";
