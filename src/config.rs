//! Process configuration resolved once from the environment.

use std::time::Duration;

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    // Database
    pub db_user: String,
    pub db_password: String,
    pub db_host: String,
    pub db_port: String,
    pub db_name: String,
    pub db_pool_size: u32,

    // Ticket platform
    pub jira_url: Option<String>,
    pub jira_username: Option<String>,
    pub jira_api_token: Option<String>,
    pub jira_agent_account_id: Option<String>,
    pub jira_project: String,

    // Workflow engine
    pub engine_address: String,
    pub engine_namespace: String,
    pub task_queue: String,

    // Model providers
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Ordered fallback chain of model identifiers.
    pub llm_fallback_chain: Vec<String>,

    // External search
    pub tavily_api_key: Option<String>,
    pub enable_web_search: bool,

    // Polling
    pub poll_base_interval: Duration,

    // HTTP
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Self {
        let chain = env_or(
            "LLM_FALLBACK_CHAIN",
            "gemini-2.0-flash,gemini-2.0-flash-lite,gemini-2.5-flash,gpt-4o-mini",
        );

        Self {
            db_user: env_or("DB_USER", "assistiq"),
            db_password: env_or("DB_PASSWORD", "assistiq"),
            db_host: env_or("DB_HOST", "localhost"),
            db_port: env_or("DB_PORT", "5432"),
            db_name: env_or("DB_NAME", "assistiq"),
            db_pool_size: env_or("DB_POOL_SIZE", "10").parse().unwrap_or(10),

            jira_url: env_opt("JIRA_URL"),
            jira_username: env_opt("JIRA_USERNAME"),
            jira_api_token: env_opt("JIRA_API_TOKEN"),
            jira_agent_account_id: env_opt("JIRA_AGENT_USER_ACCOUNT_ID"),
            jira_project: env_or("JIRA_PROJECT", "ERP"),

            engine_address: env_or("ENGINE_ADDRESS", "localhost:7233"),
            engine_namespace: env_or("ENGINE_NAMESPACE", "default"),
            task_queue: env_or("TASK_QUEUE", assistiq_workflow::DEFAULT_TASK_QUEUE),

            gemini_api_key: env_opt("GEMINI_API_KEY"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            llm_fallback_chain: parse_chain(&chain),

            tavily_api_key: env_opt("TAVILY_API_KEY"),
            enable_web_search: env_or("ENABLE_WEB_SEARCH", "1") != "0",

            poll_base_interval: Duration::from_secs(
                env_or("POLL_INTERVAL_SECS", "300").parse().unwrap_or(300),
            ),

            bind_addr: env_or("BIND_ADDR", "127.0.0.1:8000"),
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}

fn parse_chain(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_parsing_preserves_order_and_trims() {
        let chain = parse_chain(" gemini-2.0-flash , gpt-4o-mini ,, ");
        assert_eq!(chain, vec!["gemini-2.0-flash", "gpt-4o-mini"]);
    }

    #[test]
    fn database_url_shape() {
        let settings = Settings {
            db_user: "u".into(),
            db_password: "p".into(),
            db_host: "h".into(),
            db_port: "5433".into(),
            db_name: "d".into(),
            db_pool_size: 10,
            jira_url: None,
            jira_username: None,
            jira_api_token: None,
            jira_agent_account_id: None,
            jira_project: "ERP".into(),
            engine_address: "localhost:7233".into(),
            engine_namespace: "default".into(),
            task_queue: "assistiq-task-queue".into(),
            gemini_api_key: None,
            openai_api_key: None,
            llm_fallback_chain: vec![],
            tavily_api_key: None,
            enable_web_search: true,
            poll_base_interval: Duration::from_secs(300),
            bind_addr: "127.0.0.1:8000".into(),
        };
        assert_eq!(settings.database_url(), "postgresql://u:p@h:5433/d");
    }
}
