//! Indexed repository records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique key of an indexed repository record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoKey {
    pub user_id: String,
    pub repo_owner: String,
    pub repo_name: String,
}

impl RepoKey {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        repo_owner: impl Into<String>,
        repo_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            repo_owner: repo_owner.into(),
            repo_name: repo_name.into(),
        }
    }
}

/// A repository a user has indexed for retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRepo {
    pub id: i64,
    pub user_id: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub indexed_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl IndexedRepo {
    /// `owner/name` label.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.repo_owner, self.repo_name)
    }
}

/// Split a GitHub URL (or `owner/name` shorthand) into owner and name.
///
/// Accepts `https://github.com/owner/name`, trailing slashes, `.git`
/// suffixes and extra path segments such as `/tree/main`.
#[must_use]
pub fn parse_github_repo(url: &str) -> Option<(String, String)> {
    let trimmed = url.trim();
    let path = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let path = path
        .strip_prefix("www.")
        .unwrap_or(path)
        .strip_prefix("github.com/")
        .unwrap_or(path);

    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let owner = parts.next()?;
    let name = parts.next()?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    if owner.contains(':') || name.is_empty() {
        return None;
    }
    Some((owner.to_string(), name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_github_repo() {
        let expected = Some(("acme".to_string(), "widgets".to_string()));
        assert_eq!(parse_github_repo("https://github.com/acme/widgets"), expected);
        assert_eq!(parse_github_repo("https://github.com/acme/widgets.git"), expected);
        assert_eq!(parse_github_repo("github.com/acme/widgets/"), expected);
        assert_eq!(parse_github_repo("https://github.com/acme/widgets/tree/main"), expected);
        assert_eq!(parse_github_repo("acme/widgets"), expected);
    }

    #[test]
    fn test_parse_github_repo_rejects_incomplete() {
        assert_eq!(parse_github_repo("https://github.com/acme"), None);
        assert_eq!(parse_github_repo(""), None);
    }
}
