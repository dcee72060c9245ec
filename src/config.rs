use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub sentry_dsn: Option<String>,
    pub backend_url: String,
    pub backend_token: Option<String>,
    pub memory_dir: PathBuf,
    /// Cron expression for the daily analysis run; unset disables it.
    pub analysis_schedule: Option<String>,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bin: String,
    pub model: String,
    pub max_turns: u32,
    pub max_budget_usd: f64,
    pub allowed_tools: Vec<String>,
    pub working_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let memory_dir = std::env::var("MEMORY_DIR").map(PathBuf::from).unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".quantdeck")
                .join("memory")
        });

        Self {
            port: env_parsed("PORT", 8090),
            environment: env_or("ENVIRONMENT", "local"),
            sentry_dsn: env_opt("SENTRY_DSN"),
            backend_url: env_or("BACKEND_URL", "http://localhost:8000"),
            backend_token: env_opt("BACKEND_TOKEN"),
            memory_dir,
            analysis_schedule: env_opt("ANALYSIS_SCHEDULE"),
            engine: EngineConfig::from_env(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            bin: env_or("ENGINE_BIN", "claude"),
            model: env_or("ENGINE_MODEL", "sonnet"),
            max_turns: env_parsed("ENGINE_MAX_TURNS", 40),
            max_budget_usd: env_parsed("ENGINE_MAX_BUDGET_USD", 5.0),
            allowed_tools: split_csv(&env_or("ENGINE_ALLOWED_TOOLS", "")),
            working_dir: std::env::var("ENGINE_WORKING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_csv() {
        assert_eq!(split_csv("Bash, WebFetch ,Read"), vec!["Bash", "WebFetch", "Read"]);
        assert!(split_csv("").is_empty());
        assert!(split_csv(" , ,").is_empty());
    }

    #[test]
    fn test_env_parsed_falls_back_on_missing() {
        assert_eq!(env_parsed("QUANTDECK_TEST_UNSET_PORT", 8090u16), 8090);
    }

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("QUANTDECK_TEST_UNSET_ENV", "local"), "local");
    }
}
