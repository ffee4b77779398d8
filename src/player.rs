use reqwest::Url;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::crawler::fetch_html;
use crate::error::FetchError;
use crate::headers::HeaderProfile;
use crate::normalize::clean_cell;

pub const DEFAULT_PLATFORM: &str = "Xbox";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlayerStats {
    pub name: String,
    pub rank: String,
    pub mmr: String,
}

/// `<base>/<platform>/<player_id>`, each segment percent-encoded.
pub fn profile_url(base: &Url, platform: &str, player_id: &str) -> Result<Url, FetchError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| FetchError::InvalidUrl(format!("{base} cannot take a path")))?
        .pop_if_empty()
        .push(platform)
        .push(player_id);
    Ok(url)
}

pub async fn fetch_player_stats(
    client: &reqwest::Client,
    base: &Url,
    platform: &str,
    player_id: &str,
    headers: &HeaderProfile,
) -> Result<PlayerStats, FetchError> {
    let url = profile_url(base, platform, player_id)?;
    let body = fetch_html(client, url.as_str(), headers).await?;
    parse_player_stats(&body)
}

/// A profile page with none of the stat fields is treated as "no such player".
pub fn parse_player_stats(html: &str) -> Result<PlayerStats, FetchError> {
    let document = Html::parse_document(html);
    let text_of = |selector: &str| -> Result<String, FetchError> {
        let sel = Selector::parse(selector)
            .map_err(|_| FetchError::InvalidSelector(selector.to_string()))?;
        Ok(document
            .select(&sel)
            .next()
            .map(|el| clean_cell(&el.text().collect::<String>()))
            .unwrap_or_default())
    };

    let stats = PlayerStats {
        name: text_of("h1.player-name")?,
        rank: text_of("span.player-rank")?,
        mmr: text_of("span.player-mmr")?,
    };
    if stats.name.is_empty() && stats.rank.is_empty() && stats.mmr.is_empty() {
        return Err(FetchError::EmptyResultSet);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_url_encodes_segments() {
        let base = Url::parse("https://rlstats.net/profile").unwrap();
        assert_eq!(
            profile_url(&base, "Xbox", "Some Gamer/1").unwrap().as_str(),
            "https://rlstats.net/profile/Xbox/Some%20Gamer%2F1"
        );

        let trailing = Url::parse("https://rlstats.net/profile/").unwrap();
        assert_eq!(
            profile_url(&trailing, "Steam", "abc").unwrap().as_str(),
            "https://rlstats.net/profile/Steam/abc"
        );
    }

    #[test]
    fn opaque_base_is_invalid_url() {
        let base = Url::parse("mailto:stats@rlstats.net").unwrap();
        assert!(matches!(
            profile_url(&base, "Xbox", "abc"),
            Err(FetchError::InvalidUrl(_))
        ));
    }

    #[test]
    fn stats_are_read_from_profile() {
        let html = r#"
            <h1 class="player-name"> Speedy </h1>
            <span class="player-rank">Grand Champion</span>
            <span class="player-mmr">1,512</span>
        "#;
        assert_eq!(
            parse_player_stats(html).unwrap(),
            PlayerStats {
                name: "Speedy".to_string(),
                rank: "Grand Champion".to_string(),
                mmr: "1,512".to_string(),
            }
        );
    }

    #[test]
    fn partial_profile_keeps_what_exists() {
        let stats = parse_player_stats(r#"<h1 class="player-name">Only Name</h1>"#).unwrap();
        assert_eq!(stats.name, "Only Name");
        assert!(stats.rank.is_empty());
    }

    #[test]
    fn missing_profile_is_empty_result() {
        assert_eq!(
            parse_player_stats("<html><body>404</body></html>"),
            Err(FetchError::EmptyResultSet)
        );
    }
}
