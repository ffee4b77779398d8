use reqwest::Url;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::crawler::fetch_html;
use crate::error::FetchError;
use crate::headers::HeaderProfile;

const ITEM_SELECTOR: &str = ".item-details";
const SUBTITLE_SELECTOR: &str = ".item-subtitle";
const LINK_SELECTOR: &str = "a[href]";

/// Subtitles read "<category> - <headline>".
const SUBTITLE_DELIMITER: &str = " - ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewsArticle {
    pub title: String,
    pub link: String,
}

pub async fn fetch_news(
    client: &reqwest::Client,
    page_url: &Url,
    base_url: &Url,
    headers: &HeaderProfile,
) -> Result<Vec<NewsArticle>, FetchError> {
    let body = fetch_html(client, page_url.as_str(), headers).await?;
    parse_news(&body, base_url)
}

/// Articles in page order. Entries missing a headline or a usable link are
/// skipped.
pub fn parse_news(html: &str, base_url: &Url) -> Result<Vec<NewsArticle>, FetchError> {
    let item_sel = parse_selector(ITEM_SELECTOR)?;
    let subtitle_sel = parse_selector(SUBTITLE_SELECTOR)?;
    let link_sel = parse_selector(LINK_SELECTOR)?;

    let document = Html::parse_document(html);
    let articles = document
        .select(&item_sel)
        .filter_map(|item| {
            let subtitle = item
                .select(&subtitle_sel)
                .next()
                .map(|el| el.text().collect::<String>())
                .unwrap_or_default();
            let title = headline(&subtitle);
            if title.is_empty() {
                return None;
            }

            let href = item.select(&link_sel).next()?.value().attr("href")?;
            let link = base_url.join(href.trim()).ok()?;
            Some(NewsArticle {
                title: title.to_string(),
                link: link.to_string(),
            })
        })
        .collect();
    Ok(articles)
}

/// Drop everything up to and including the first delimiter.
pub fn headline(subtitle: &str) -> &str {
    match subtitle.find(SUBTITLE_DELIMITER) {
        Some(at) => subtitle[at + SUBTITLE_DELIMITER.len()..].trim(),
        None => subtitle.trim(),
    }
}

fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector).map_err(|_| FetchError::InvalidSelector(selector.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve;
    use axum::response::Html as HtmlBody;
    use axum::routing::get;
    use axum::Router;

    const PAGE: &str = r#"
        <html><body>
          <div class="item-details">
            <a href="/articles/new-patch-notes">read</a>
            <span class="item-subtitle">News - New patch notes   are out  </span>
          </div>
          <div class="item-details">
            <span class="item-subtitle">Review - No link here</span>
          </div>
          <div class="item-details">
            <a href="https://cdn.example.com/feature">x</a>
            <span class="item-subtitle">Feature - A - B</span>
          </div>
          <div class="item-details">
            <a href="/empty">x</a>
            <span class="item-subtitle">   </span>
          </div>
        </body></html>
    "#;

    fn ign() -> Url {
        Url::parse("https://www.ign.com").unwrap()
    }

    #[test]
    fn headline_strips_category() {
        assert_eq!(headline("News - Big update"), "Big update");
        assert_eq!(headline("Guide - Part 1 - Basics"), "Part 1 - Basics");
        assert_eq!(headline("No delimiter"), "No delimiter");
        assert_eq!(headline(""), "");
    }

    #[test]
    fn headline_keeps_inner_spacing() {
        assert_eq!(headline("  News -  Two  spaces \n"), "Two  spaces");
    }

    #[test]
    fn articles_resolve_links_and_skip_incomplete_items() {
        let articles = parse_news(PAGE, &ign()).unwrap();
        assert_eq!(
            articles,
            vec![
                NewsArticle {
                    title: "New patch notes   are out".to_string(),
                    link: "https://www.ign.com/articles/new-patch-notes".to_string(),
                },
                NewsArticle {
                    title: "A - B".to_string(),
                    link: "https://cdn.example.com/feature".to_string(),
                },
            ]
        );
    }

    #[test]
    fn page_without_items_is_empty() {
        assert!(parse_news("<html></html>", &ign()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetches_over_http() {
        let base = serve(Router::new().route("/news", get(|| async { HtmlBody(PAGE) }))).await;
        let page = base.join("news").unwrap();

        let articles = fetch_news(&reqwest::Client::new(), &page, &ign(), &HeaderProfile::default())
            .await
            .unwrap();
        assert_eq!(articles.len(), 2);
    }
}
