use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::config::Config;
use crate::crawler::{ScrapeOutcome, Scraper};
use crate::error::{FetchError, ScrapeError};
use crate::news::{self, NewsArticle};
use crate::normalize::LeaderboardRecord;
use crate::player::{self, PlayerStats};
use crate::registry::{FetchStrategy, Game};

pub struct AppState {
    pub scraper: Scraper,
    pub config: Config,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/leaderboard", get(leaderboard))
        .route("/leaderboards", get(leaderboards))
        .route("/games", get(list_games))
        .route("/news", get(latest_news))
        .route("/player-stats/:player_id", get(player_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// How a scrape ended, as seen by API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Records,
    NoData,
    ConfigurationError,
    TransientFailure,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    outcome: Outcome,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            outcome: self.outcome,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ScrapeError> for ApiError {
    fn from(err: ScrapeError) -> Self {
        match err {
            ScrapeError::UnknownSite(_) => ApiError {
                status: StatusCode::NOT_FOUND,
                outcome: Outcome::ConfigurationError,
                message: err.to_string(),
            },
            ScrapeError::Fetch(FetchError::InvalidUrl(_)) => ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                outcome: Outcome::ConfigurationError,
                message: err.to_string(),
            },
            ScrapeError::Fetch(_) => ApiError {
                status: StatusCode::BAD_GATEWAY,
                outcome: Outcome::TransientFailure,
                message: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    /// Game identifier, e.g. `rocketleague`. Defaults to the configured game.
    pub game: Option<String>,
    /// Number of entries. Missing, unparseable or zero means the default.
    pub top: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardResponse {
    pub game: String,
    pub outcome: Outcome,
    /// JSON-encoded array of `LeaderboardRecord`.
    pub result: String,
    pub scraped_at: DateTime<Utc>,
}

/// Anything that is not a positive integer falls back to `default`; the
/// result is capped at `max`.
pub fn resolve_top(raw: Option<&str>, default: usize, max: usize) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
        .min(max)
}

#[utoipa::path(
    get,
    path = "/leaderboard",
    params(LeaderboardQuery),
    responses(
        (status = 200, description = "Leaderboard scraped (possibly empty)", body = LeaderboardResponse),
        (status = 404, description = "Unknown game", body = ErrorBody),
        (status = 502, description = "Upstream site failed", body = ErrorBody)
    ),
    tag = "leaderboard"
)]
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    let config = &state.config;
    let game = query.game.unwrap_or_else(|| config.default_game.clone());
    let top = resolve_top(query.top.as_deref(), config.default_top, config.max_top);

    let outcome = state.scraper.scrape_leaderboard(&game, top).await?;
    info!(%game, top, "{} gamers", outcome.records().len());

    let (outcome, records) = match outcome {
        ScrapeOutcome::Records(records) => (Outcome::Records, records),
        ScrapeOutcome::NoData => (Outcome::NoData, Vec::new()),
    };
    let result = serde_json::to_string(&records).map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        outcome: Outcome::TransientFailure,
        message: e.to_string(),
    })?;

    Ok(Json(LeaderboardResponse {
        game,
        outcome,
        result,
        scraped_at: Utc::now(),
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardsQuery {
    /// Comma separated game identifiers.
    pub games: Option<String>,
    pub top: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GameLeaderboard {
    pub game: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<LeaderboardRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Upper bound on entries in one `/leaderboards` response.
const MAX_LEADERBOARDS: usize = 16;

/// Comma separated ids, one per game in first-seen order. Spellings of the
/// same registered game collapse to the first; unknown ids dedup on their
/// text.
fn requested_games(raw: &str) -> Vec<String> {
    let mut known = HashSet::new();
    let mut unknown = HashSet::new();
    let mut games = Vec::new();

    for id in raw.split(',').map(str::trim).filter(|g| !g.is_empty()) {
        let first_seen = match Game::from_id(id) {
            Some(game) => known.insert(game),
            None => unknown.insert(id),
        };
        if !first_seen {
            continue;
        }
        if games.len() == MAX_LEADERBOARDS {
            warn!(limit = MAX_LEADERBOARDS, "too many games requested, ignoring the rest");
            break;
        }
        games.push(id.to_string());
    }
    games
}

#[utoipa::path(
    get,
    path = "/leaderboards",
    params(LeaderboardsQuery),
    responses(
        (status = 200, description = "One entry per requested game, in request order", body = [GameLeaderboard])
    ),
    tag = "leaderboard"
)]
pub async fn leaderboards(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardsQuery>,
) -> Json<Vec<GameLeaderboard>> {
    let config = &state.config;
    let top = resolve_top(query.top.as_deref(), config.default_top, config.max_top);

    let games = requested_games(query.games.as_deref().unwrap_or(&config.default_game));

    let entries = state
        .scraper
        .scrape_many(&games, top)
        .await
        .into_iter()
        .map(|(game, result)| match result {
            Ok(ScrapeOutcome::Records(records)) => GameLeaderboard {
                game,
                outcome: Outcome::Records,
                records: Some(records),
                error: None,
            },
            Ok(ScrapeOutcome::NoData) => GameLeaderboard {
                game,
                outcome: Outcome::NoData,
                records: Some(Vec::new()),
                error: None,
            },
            Err(err) => {
                let api_err = ApiError::from(err);
                GameLeaderboard {
                    game,
                    outcome: api_err.outcome,
                    records: None,
                    error: Some(api_err.message),
                }
            }
        })
        .collect();

    Json(entries)
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GameInfo {
    pub id: String,
    pub strategy: FetchStrategy,
    pub url: String,
}

#[utoipa::path(
    get,
    path = "/games",
    responses((status = 200, description = "Registered games", body = [GameInfo])),
    tag = "leaderboard"
)]
pub async fn list_games(State(state): State<Arc<AppState>>) -> Json<Vec<GameInfo>> {
    Json(
        state
            .scraper
            .registry()
            .adapters()
            .map(|a| GameInfo {
                id: a.game.id().to_string(),
                strategy: a.strategy,
                url: a.url.clone(),
            })
            .collect(),
    )
}

#[utoipa::path(
    get,
    path = "/news",
    responses(
        (status = 200, description = "Latest articles", body = [NewsArticle]),
        (status = 500, description = "News page could not be read", body = ErrorBody)
    ),
    tag = "news"
)]
pub async fn latest_news(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<NewsArticle>>, ApiError> {
    let scraper = &state.scraper;
    news::fetch_news(
        scraper.client(),
        &state.config.news_url,
        &state.config.news_base_url,
        &scraper.header_profile(),
    )
    .await
    .map(Json)
    .map_err(|e| {
        error!(error = %e, "error fetching news");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            outcome: Outcome::TransientFailure,
            message: "Failed to fetch news".to_string(),
        }
    })
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PlayerQuery {
    /// Profile platform segment; defaults to `Xbox`.
    pub platform: Option<String>,
}

#[utoipa::path(
    get,
    path = "/player-stats/{player_id}",
    params(
        ("player_id" = String, Path, description = "Platform player id"),
        PlayerQuery
    ),
    responses(
        (status = 200, description = "Player profile stats", body = PlayerStats),
        (status = 404, description = "No such player", body = ErrorBody),
        (status = 502, description = "Upstream site failed", body = ErrorBody)
    ),
    tag = "player"
)]
pub async fn player_stats(
    State(state): State<Arc<AppState>>,
    Path(player_id): Path<String>,
    Query(query): Query<PlayerQuery>,
) -> Result<Json<PlayerStats>, ApiError> {
    let platform = query
        .platform
        .unwrap_or_else(|| player::DEFAULT_PLATFORM.to_string());
    let scraper = &state.scraper;

    let stats = player::fetch_player_stats(
        scraper.client(),
        &state.config.player_stats_url,
        &platform,
        &player_id,
        &scraper.header_profile(),
    )
    .await
    .map_err(|e| {
        error!(error = %e, %player_id, %platform, "error fetching player stats");
        match e {
            FetchError::EmptyResultSet => ApiError {
                status: StatusCode::NOT_FOUND,
                outcome: Outcome::NoData,
                message: format!("no stats for player {player_id}"),
            },
            other => ApiError::from(ScrapeError::from(other)),
        }
    })?;

    info!(%player_id, %platform, "player stats scraped");
    Ok(Json(stats))
}
