use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Result, ScrapeError};

/// Every site the scraper knows how to read. Adding a site means adding a
/// variant here and its arm in [`Game::adapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Game {
    RocketLeague,
    ApexLegends,
    CallOfDuty,
    Fortnite,
}

impl Game {
    pub const ALL: [Game; 4] = [
        Game::RocketLeague,
        Game::ApexLegends,
        Game::CallOfDuty,
        Game::Fortnite,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Game::RocketLeague => "rocketleague",
            Game::ApexLegends => "apexlegends",
            Game::CallOfDuty => "callofduty",
            Game::Fortnite => "fortnite",
        }
    }

    /// Lenient lookup: "Rocket League", "rocket-league" and "rocketleague"
    /// all name the same game.
    pub fn from_id(raw: &str) -> Option<Game> {
        let key: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        Game::ALL.into_iter().find(|g| g.id() == key)
    }

    pub fn adapter(self) -> SiteAdapter {
        match self {
            Game::RocketLeague => SiteAdapter {
                game: self,
                url: "https://rlstats.net/leaderboards/skills".to_string(),
                row_selector: r#"#leaderboard div.center table[data-platform="Steam"] tbody tr"#
                    .to_string(),
                strategy: FetchStrategy::Static,
                // the first two matched rows are table headings
                skip_rows: 2,
                min_cells: 3,
                rank_cell: 0,
                name_cell: 1,
                stat: StatFormat::Single(2),
            },
            Game::ApexLegends => SiteAdapter {
                game: self,
                url: "https://apex.tracker.gg/apex/leaderboards/stats/origin/RankScore?page=1&legend=all"
                    .to_string(),
                row_selector: TRN_TABLE_ROWS.to_string(),
                strategy: FetchStrategy::Rendered,
                skip_rows: 0,
                min_cells: 4,
                rank_cell: 0,
                name_cell: 1,
                stat: StatFormat::RankScoreLevel { score: 2, level: 3 },
            },
            Game::CallOfDuty => SiteAdapter {
                game: self,
                url: "https://cod.tracker.gg/warzone/leaderboards/stats/atvi/default?page=1"
                    .to_string(),
                row_selector: TRN_TABLE_ROWS.to_string(),
                strategy: FetchStrategy::Rendered,
                skip_rows: 0,
                min_cells: 4,
                rank_cell: 0,
                name_cell: 1,
                stat: StatFormat::WinsOutOfMatches { wins: 2, matches: 3 },
            },
            Game::Fortnite => SiteAdapter {
                game: self,
                url: "https://fortnitetracker.com/leaderboards".to_string(),
                row_selector: TRN_TABLE_ROWS.to_string(),
                strategy: FetchStrategy::Rendered,
                skip_rows: 0,
                min_cells: 5,
                rank_cell: 0,
                name_cell: 1,
                stat: StatFormat::WinsOutOfMatches { wins: 3, matches: 4 },
            },
        }
    }
}

impl std::fmt::Display for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Tracker Network sites share one table layout.
const TRN_TABLE_ROWS: &str = "table.trn-table tbody tr";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    /// Single GET, rows parsed from the returned HTML.
    Static,
    /// Rows only exist after client-side scripts run; needs a browser.
    Rendered,
}

/// How the display stat is composed from a row's cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatFormat {
    Single(usize),
    WinsOutOfMatches { wins: usize, matches: usize },
    RankScoreLevel { score: usize, level: usize },
}

impl StatFormat {
    fn cells(&self) -> Vec<usize> {
        match *self {
            StatFormat::Single(i) => vec![i],
            StatFormat::WinsOutOfMatches { wins, matches } => vec![wins, matches],
            StatFormat::RankScoreLevel { score, level } => vec![score, level],
        }
    }

    pub fn render(&self, cells: &[String]) -> String {
        let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or_default();
        match *self {
            StatFormat::Single(i) => cell(i).to_string(),
            StatFormat::WinsOutOfMatches { wins, matches } => {
                format!("{} wins out of {} matches", cell(wins), cell(matches))
            }
            StatFormat::RankScoreLevel { score, level } => {
                format!("Rank score: {}, Level: {}", cell(score), cell(level))
            }
        }
    }
}

/// Per-site scraping configuration. Built once at startup, read-only after.
#[derive(Debug, Clone)]
pub struct SiteAdapter {
    pub game: Game,
    pub url: String,
    pub row_selector: String,
    pub strategy: FetchStrategy,
    /// Leading matched rows that are markup, not data.
    pub skip_rows: usize,
    pub min_cells: usize,
    pub rank_cell: usize,
    pub name_cell: usize,
    pub stat: StatFormat,
}

impl SiteAdapter {
    /// The declared minimum, raised if the extraction rule reads past it.
    pub fn required_cells(&self) -> usize {
        let highest = self
            .stat
            .cells()
            .into_iter()
            .chain([self.rank_cell, self.name_cell])
            .max()
            .unwrap_or(0);
        self.min_cells.max(highest + 1)
    }
}

pub struct Registry {
    adapters: Vec<SiteAdapter>,
}

impl Registry {
    pub fn builtin() -> Self {
        Self::with_adapters(Game::ALL.into_iter().map(Game::adapter).collect())
    }

    pub fn with_adapters(adapters: Vec<SiteAdapter>) -> Self {
        Self { adapters }
    }

    pub fn resolve(&self, site_id: &str) -> Result<&SiteAdapter> {
        Game::from_id(site_id)
            .and_then(|game| self.adapters.iter().find(|a| a.game == game))
            .ok_or_else(|| ScrapeError::UnknownSite(site_id.to_string()))
    }

    pub fn adapters(&self) -> impl Iterator<Item = &SiteAdapter> {
        self.adapters.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_game_resolves() {
        let registry = Registry::builtin();
        for game in Game::ALL {
            let adapter = registry.resolve(game.id()).expect("registered");
            assert_eq!(adapter.game, game);
        }
    }

    #[test]
    fn unknown_game_is_rejected() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.resolve("unknown-game").unwrap_err(),
            ScrapeError::UnknownSite("unknown-game".to_string())
        );
        assert!(registry.resolve("").is_err());
        assert!(registry.resolve("gta5").is_err());
    }

    #[test]
    fn lenient_identifiers() {
        assert_eq!(Game::from_id("Rocket League"), Some(Game::RocketLeague));
        assert_eq!(Game::from_id("call-of-duty"), Some(Game::CallOfDuty));
        assert_eq!(Game::from_id("APEX_LEGENDS"), Some(Game::ApexLegends));
        assert_eq!(Game::from_id("fortnite "), Some(Game::Fortnite));
        assert_eq!(Game::from_id("minecraft"), None);
    }

    #[test]
    fn registry_only_serves_its_own_adapters() {
        let registry = Registry::with_adapters(vec![Game::Fortnite.adapter()]);
        assert!(registry.resolve("fortnite").is_ok());
        assert!(matches!(
            registry.resolve("rocketleague"),
            Err(ScrapeError::UnknownSite(_))
        ));
    }

    #[test]
    fn row_selectors_parse() {
        for game in Game::ALL {
            let adapter = game.adapter();
            assert!(
                scraper::Selector::parse(&adapter.row_selector).is_ok(),
                "{game}: {}",
                adapter.row_selector
            );
        }
    }

    #[test]
    fn declared_minimum_covers_extraction_rule() {
        for game in Game::ALL {
            let adapter = game.adapter();
            assert_eq!(adapter.required_cells(), adapter.min_cells, "{game}");
        }
    }

    #[test]
    fn stat_templates() {
        let cells: Vec<String> = ["1", "ace", "12", "40", "99"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(StatFormat::Single(2).render(&cells), "12");
        assert_eq!(
            StatFormat::WinsOutOfMatches { wins: 3, matches: 4 }.render(&cells),
            "40 wins out of 99 matches"
        );
        assert_eq!(
            StatFormat::RankScoreLevel { score: 2, level: 3 }.render(&cells),
            "Rank score: 12, Level: 40"
        );
    }
}
