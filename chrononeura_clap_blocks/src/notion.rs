//! Connection settings for the Notion document store.

use chrononeura_notion::{Client, client::DEFAULT_NOTION_VERSION};
use secrecy::{ExposeSecret, Secret};
use url::Url;

use crate::influx::parse_secret;

/// CLI config for the Notion API and the devlog database.
#[derive(Debug, Clone, clap::Parser)]
pub struct NotionConfig {
    /// Integration token with access to the devlog database.
    #[clap(
        id = "notion_token",
        long = "notion-token",
        env = "NOTION_TOKEN_AUTOJOURNAL",
        hide_env_values = true,
        value_parser = parse_secret,
        action
    )]
    pub token: Secret<String>,

    /// ID of the devlog database.
    #[clap(long = "notion-devlog-db", env = "NOTION_DB_DEVLOG_ID", action)]
    pub devlog_database_id: String,

    /// Base URL of the Notion API.
    #[clap(
        long = "notion-api-url",
        env = "NOTION_API_URL",
        default_value = "https://api.notion.com",
        action
    )]
    pub api_url: Url,

    /// Value of the `Notion-Version` header.
    #[clap(
        id = "notion_version",
        long = "notion-version",
        env = "NOTION_VERSION",
        default_value = DEFAULT_NOTION_VERSION,
        action
    )]
    pub version: String,

    /// Timeout for each request to Notion.
    #[clap(
        id = "notion_timeout",
        long = "notion-timeout",
        env = "NOTION_TIMEOUT",
        default_value = "30s",
        action
    )]
    pub timeout: humantime::Duration,

    /// Serialize upserts and appends for the same key inside this process,
    /// so that concurrent requests for a new key create a single page.
    #[clap(
        long = "devlog-serialize-upserts",
        env = "CHRONONEURA_DEVLOG_SERIALIZE_UPSERTS",
        action = clap::ArgAction::SetTrue
    )]
    pub serialize_upserts: bool,
}

impl NotionConfig {
    pub fn client(&self) -> Result<Client, chrononeura_notion::Error> {
        Client::new(self.api_url.clone(), self.token.expose_secret())?
            .with_version(&self.version)
            .with_timeout(*self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults() {
        let config = NotionConfig::try_parse_from([
            "chrononeura",
            "--notion-token",
            "secret_abc",
            "--notion-devlog-db",
            "db1",
        ])
        .unwrap();

        assert_eq!(config.api_url.as_str(), "https://api.notion.com/");
        assert_eq!(config.version, "2022-06-28");
        assert!(!config.serialize_upserts);
        assert!(!format!("{config:?}").contains("secret_abc"));
        config.client().unwrap();
    }

    #[test]
    fn token_and_database_are_required() {
        assert!(NotionConfig::try_parse_from(["chrononeura", "--notion-devlog-db", "db1"]).is_err());
    }
}
