use futures::future::join_all;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::browser::{fetch_rendered, BrowserLauncher, RenderTimeouts};
use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::headers::HeaderProfile;
use crate::normalize::{clean_cell, normalize, LeaderboardRecord, RawRow};
use crate::registry::{FetchStrategy, Registry, SiteAdapter};

/// What a scrape found. An empty page is a result, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    Records(Vec<LeaderboardRecord>),
    NoData,
}

impl ScrapeOutcome {
    pub fn records(&self) -> &[LeaderboardRecord] {
        match self {
            ScrapeOutcome::Records(records) => records,
            ScrapeOutcome::NoData => &[],
        }
    }
}

/// Resolves adapters and runs the matching fetch strategy. Cheap to clone;
/// holds no per-scrape state.
#[derive(Clone)]
pub struct Scraper {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    client: reqwest::Client,
    launcher: Arc<dyn BrowserLauncher>,
    timeouts: RenderTimeouts,
    rotate_user_agent: bool,
}

impl Scraper {
    pub fn new(
        registry: Registry,
        launcher: Arc<dyn BrowserLauncher>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                client,
                launcher,
                timeouts: config.render,
                rotate_user_agent: config.rotate_user_agent,
            }),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    pub fn header_profile(&self) -> HeaderProfile {
        if self.inner.rotate_user_agent {
            HeaderProfile::rotated()
        } else {
            HeaderProfile::default()
        }
    }

    /// Scrape the top `top` entries of `site_id`'s leaderboard, in the
    /// site's own order.
    pub async fn scrape_leaderboard(&self, site_id: &str, top: usize) -> Result<ScrapeOutcome> {
        let span = info_span!("scrape", scrape_id = %Uuid::new_v4(), site = site_id, top);
        async move {
            let adapter = self.inner.registry.resolve(site_id).map_err(|e| {
                warn!(error = %e, "rejecting scrape");
                e
            })?;

            let headers = self.header_profile();
            let fetched = match adapter.strategy {
                FetchStrategy::Static => fetch_static(&self.inner.client, adapter, &headers).await,
                FetchStrategy::Rendered => {
                    fetch_rendered(
                        self.inner.launcher.clone(),
                        adapter,
                        &headers,
                        self.inner.timeouts,
                    )
                    .await
                }
            };

            let rows = match fetched {
                Ok(rows) => rows,
                Err(FetchError::EmptyResultSet) => {
                    info!("page had no leaderboard rows");
                    return Ok(ScrapeOutcome::NoData);
                }
                Err(e) => {
                    error!(error = %e, strategy = ?adapter.strategy, "leaderboard fetch failed");
                    return Err(e.into());
                }
            };

            let records = normalize(adapter, &rows, top);
            info!(rows = rows.len(), records = records.len(), "🏆 leaderboard scraped");
            if records.is_empty() {
                Ok(ScrapeOutcome::NoData)
            } else {
                Ok(ScrapeOutcome::Records(records))
            }
        }
        .instrument(span)
        .await
    }

    /// Scrape several sites concurrently. Each rendered scrape gets its own
    /// browser; results follow the order of `site_ids`.
    pub async fn scrape_many(
        &self,
        site_ids: &[String],
        top: usize,
    ) -> Vec<(String, Result<ScrapeOutcome>)> {
        join_all(site_ids.iter().map(|id| async move {
            (id.clone(), self.scrape_leaderboard(id, top).await)
        }))
        .await
    }
}

/// GET a page with the given identity and return its body.
pub async fn fetch_html(
    client: &reqwest::Client,
    url: &str,
    headers: &HeaderProfile,
) -> std::result::Result<String, FetchError> {
    let response = client
        .get(url)
        .headers(headers.to_header_map())
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let body = response.text().await?;
    debug!(url, bytes = body.len(), "fetched page");
    Ok(body)
}

/// Single GET of `adapter.url`, rows parsed out of the returned markup.
pub async fn fetch_static(
    client: &reqwest::Client,
    adapter: &SiteAdapter,
    headers: &HeaderProfile,
) -> std::result::Result<Vec<RawRow>, FetchError> {
    let body = fetch_html(client, &adapter.url, headers).await?;
    let rows = extract_rows(&body, &adapter.row_selector, adapter.skip_rows)?;
    if rows.is_empty() {
        return Err(FetchError::EmptyResultSet);
    }
    Ok(rows)
}

/// Cell texts of every `row_selector` match after the first `skip`.
pub fn extract_rows(
    html: &str,
    row_selector: &str,
    skip: usize,
) -> std::result::Result<Vec<RawRow>, FetchError> {
    let row_sel = Selector::parse(row_selector)
        .map_err(|_| FetchError::InvalidSelector(row_selector.to_string()))?;
    let cell_sel =
        Selector::parse("td").map_err(|_| FetchError::InvalidSelector("td".to_string()))?;

    let document = Html::parse_document(html);
    Ok(document
        .select(&row_sel)
        .skip(skip)
        .map(|row| {
            RawRow::new(
                row.select(&cell_sel)
                    .map(|td| clean_cell(&td.text().collect::<String>())),
            )
        })
        .collect())
}
