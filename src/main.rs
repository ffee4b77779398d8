mod api;
mod browser;
mod config;
mod crawler;
mod error;
mod headers;
mod news;
mod normalize;
mod player;
mod registry;
#[cfg(test)]
mod testing;

use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::browser::ChromeLauncher;
use crate::config::Config;
use crate::crawler::Scraper;
use crate::registry::Registry;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::leaderboard,
        api::leaderboards,
        api::list_games,
        api::latest_news,
        api::player_stats
    ),
    components(
        schemas(
            api::LeaderboardResponse,
            api::GameLeaderboard,
            api::GameInfo,
            api::ErrorBody,
            api::Outcome,
            crate::normalize::LeaderboardRecord,
            crate::news::NewsArticle,
            crate::player::PlayerStats,
            crate::registry::FetchStrategy
        )
    ),
    tags(
        (name = "leaderboard", description = "Scraped game leaderboards"),
        (name = "news", description = "Gaming news headlines"),
        (name = "player", description = "Player profile stats")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let launcher = Arc::new(ChromeLauncher::new(
        config.chrome_headless,
        config.chrome_sandbox,
        config.render,
    ));
    let scraper = Scraper::new(Registry::builtin(), launcher, &config)?;
    scraper
        .registry()
        .resolve(&config.default_game)
        .context("DEFAULT_GAME must name a registered game")?;

    let games: Vec<_> = scraper.registry().adapters().map(|a| a.game.id()).collect();
    info!(?games, default_game = %config.default_game, "🎮 scraper ready");

    let port = config.port;
    let state = Arc::new(api::AppState { scraper, config });
    let app = api::router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Server running: http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutting down");
}
