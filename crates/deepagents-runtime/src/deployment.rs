//! Deployment configuration of the agent runtime.

use thiserror::Error;

/// Default local runtime address.
pub const DEFAULT_DEPLOYMENT_URL: &str = "http://localhost:2024";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No agent ID configured in environment")]
    MissingAgentId,
    #[error("Invalid deployment URL: {0}")]
    InvalidUrl(String),
}

/// Where the agent runtime lives and which graph to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub deployment_url: String,
    pub agent_id: String,
}

impl Deployment {
    /// Validate and build a deployment.
    ///
    /// # Errors
    /// Returns error if the agent id is missing or the URL is not http(s).
    pub fn new(deployment_url: &str, agent_id: Option<&str>) -> Result<Self, ConfigError> {
        let agent_id = agent_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingAgentId)?;

        let url = deployment_url.trim().trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(deployment_url.to_string()));
        }

        Ok(Self {
            deployment_url: url.to_string(),
            agent_id: agent_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_agent_id() {
        assert_eq!(
            Deployment::new(DEFAULT_DEPLOYMENT_URL, None),
            Err(ConfigError::MissingAgentId)
        );
        assert_eq!(
            Deployment::new(DEFAULT_DEPLOYMENT_URL, Some("  ")),
            Err(ConfigError::MissingAgentId)
        );
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let deployment = Deployment::new("https://agents.example.com/", Some("deepagent")).unwrap();
        assert_eq!(deployment.deployment_url, "https://agents.example.com");
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            Deployment::new("agents.example.com", Some("deepagent")),
            Err(ConfigError::InvalidUrl(_))
        ));
    }
}
