use anyhow::{Context, Result};
use reqwest::Url;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::browser::RenderTimeouts;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub default_game: String,
    pub default_top: usize,
    pub max_top: usize,
    pub http_timeout: Duration,
    pub render: RenderTimeouts,
    pub chrome_headless: bool,
    pub chrome_sandbox: bool,
    pub rotate_user_agent: bool,
    pub news_url: Url,
    pub news_base_url: Url,
    pub player_stats_url: Url,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            default_game: "rocketleague".to_string(),
            default_top: 20,
            max_top: 100,
            http_timeout: Duration::from_secs(30),
            render: RenderTimeouts::default(),
            chrome_headless: true,
            chrome_sandbox: false,
            rotate_user_agent: false,
            news_url: Url::parse("https://www.ign.com/news").expect("static url"),
            news_base_url: Url::parse("https://www.ign.com").expect("static url"),
            player_stats_url: Url::parse("https://rlstats.net/profile").expect("static url"),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let render = RenderTimeouts {
            navigation: Duration::from_millis(parse_or(
                get("NAVIGATION_TIMEOUT_MS"),
                "NAVIGATION_TIMEOUT_MS",
                defaults.render.navigation.as_millis() as u64,
            )?),
            selector: Duration::from_millis(parse_or(
                get("SELECTOR_TIMEOUT_MS"),
                "SELECTOR_TIMEOUT_MS",
                defaults.render.selector.as_millis() as u64,
            )?),
        };

        let config = Self {
            port: parse_or(get("PORT"), "PORT", defaults.port)?,
            default_game: get("DEFAULT_GAME").unwrap_or(defaults.default_game),
            default_top: parse_or(get("DEFAULT_TOP"), "DEFAULT_TOP", defaults.default_top)?,
            max_top: parse_or(get("MAX_TOP"), "MAX_TOP", defaults.max_top)?,
            http_timeout: Duration::from_secs(parse_or(
                get("HTTP_TIMEOUT_SECS"),
                "HTTP_TIMEOUT_SECS",
                defaults.http_timeout.as_secs(),
            )?),
            render,
            chrome_headless: parse_or(get("CHROME_HEADLESS"), "CHROME_HEADLESS", defaults.chrome_headless)?,
            chrome_sandbox: parse_or(get("CHROME_SANDBOX"), "CHROME_SANDBOX", defaults.chrome_sandbox)?,
            rotate_user_agent: parse_or(
                get("ROTATE_USER_AGENT"),
                "ROTATE_USER_AGENT",
                defaults.rotate_user_agent,
            )?,
            news_url: parse_or(get("NEWS_URL"), "NEWS_URL", defaults.news_url)?,
            news_base_url: parse_or(get("NEWS_BASE_URL"), "NEWS_BASE_URL", defaults.news_base_url)?,
            player_stats_url: parse_or(
                get("PLAYER_STATS_URL"),
                "PLAYER_STATS_URL",
                defaults.player_stats_url,
            )?,
        };

        if config.default_top == 0 || config.max_top == 0 {
            anyhow::bail!("DEFAULT_TOP and MAX_TOP must be positive");
        }
        for (key, url) in [
            ("NEWS_BASE_URL", &config.news_base_url),
            ("PLAYER_STATS_URL", &config.player_stats_url),
        ] {
            if url.cannot_be_a_base() {
                anyhow::bail!("{key} must be a hierarchical url, got {url}");
            }
        }
        Ok(config)
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {value:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.default_game, "rocketleague");
        assert_eq!(config.default_top, 20);
        assert_eq!(config.render.navigation, Duration::from_millis(60_000));
        assert!(config.chrome_headless);
        assert_eq!(config.news_base_url.as_str(), "https://www.ign.com/");
    }

    #[test]
    fn overrides_are_applied() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("DEFAULT_GAME", "fortnite"),
            ("SELECTOR_TIMEOUT_MS", "1500"),
            ("ROTATE_USER_AGENT", "true"),
            ("NEWS_URL", "http://localhost:9000/news"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.default_game, "fortnite");
        assert_eq!(config.render.selector, Duration::from_millis(1500));
        assert!(config.rotate_user_agent);
        assert_eq!(config.news_url.as_str(), "http://localhost:9000/news");
    }

    #[test]
    fn malformed_values_name_the_key() {
        let err = from_pairs(&[("MAX_TOP", "lots")]).unwrap_err();
        assert!(err.to_string().contains("MAX_TOP"));
        assert!(from_pairs(&[("CHROME_HEADLESS", "yes")]).is_err());
        assert!(from_pairs(&[("DEFAULT_TOP", "0")]).is_err());
    }

    #[test]
    fn opaque_urls_are_rejected() {
        let err = from_pairs(&[("PLAYER_STATS_URL", "mailto:stats@rlstats.net")]).unwrap_err();
        assert!(err.to_string().contains("PLAYER_STATS_URL"));
        assert!(from_pairs(&[("NEWS_BASE_URL", "data:text/plain,hi")]).is_err());
    }

    #[test]
    fn blank_values_fall_back() {
        let config = from_pairs(&[("PORT", "  ")]).unwrap();
        assert_eq!(config.port, 3000);
    }
}
