//! Fixtures shared by the unit tests: an in-process upstream server and a
//! scripted browser.

use axum::Router;
use reqwest::Url;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::browser::{AbortHandle, BrowserLauncher, BrowserSession};
use crate::error::FetchError;
use crate::headers::HeaderProfile;
use crate::normalize::RawRow;

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub(crate) async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture server");
    let addr = listener.local_addr().expect("fixture addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fixture server");
    });
    Url::parse(&format!("http://{addr}/")).expect("fixture url")
}

/// rlstats-style markup: rows under the Steam table of `#leaderboard`.
pub(crate) fn steam_table_page(rows: &[Vec<String>]) -> String {
    let body: String = rows
        .iter()
        .map(|cells| {
            let tds: String = cells.iter().map(|c| format!("<td>{c}</td>")).collect();
            format!("<tr>{tds}</tr>")
        })
        .collect();
    format!(
        r#"<html><body><div id="leaderboard"><div class="center">
        <table data-platform="Xbox"><tbody><tr><td>x</td><td>ignored</td><td>0</td></tr></tbody></table>
        <table data-platform="Steam"><tbody>{body}</tbody></table>
        </div></div></body></html>"#
    )
}

/// `n` data rows whose rank cell reads `R1`, `R2`, ...
pub(crate) fn numbered_rows(n: usize) -> Vec<Vec<String>> {
    (1..=n)
        .map(|i| vec![format!("R{i}"), format!("player {i}"), format!("{}", 2000 - i)])
        .collect()
}

#[derive(Default)]
pub(crate) struct Probe {
    launched: AtomicUsize,
    closed: AtomicUsize,
    selector_waits: AtomicUsize,
    last_url: Mutex<Option<String>>,
    last_user_agent: Mutex<Option<String>>,
}

impl Probe {
    pub(crate) fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn selector_waits(&self) -> usize {
        self.selector_waits.load(Ordering::SeqCst)
    }

    pub(crate) fn last_url(&self) -> Option<String> {
        self.last_url.lock().unwrap().clone()
    }

    pub(crate) fn last_user_agent(&self) -> Option<String> {
        self.last_user_agent.lock().unwrap().clone()
    }
}

#[derive(Clone)]
pub(crate) enum SessionScript {
    Rows(Vec<RawRow>),
    SelectorNeverAppears,
    NavigationFails,
    LaunchFails,
    SlowNavigation(Duration),
}

pub(crate) struct FakeLauncher {
    probe: Arc<Probe>,
    script: SessionScript,
}

impl FakeLauncher {
    pub(crate) fn new(probe: Arc<Probe>, script: SessionScript) -> Self {
        Self { probe, script }
    }
}

impl BrowserLauncher for FakeLauncher {
    fn launch(&self, headers: &HeaderProfile) -> Result<Box<dyn BrowserSession>, FetchError> {
        if let SessionScript::LaunchFails = self.script {
            return Err(FetchError::LaunchFailure("no chrome binary".to_string()));
        }
        self.probe.launched.fetch_add(1, Ordering::SeqCst);
        *self.probe.last_user_agent.lock().unwrap() = Some(headers.user_agent.clone());
        Ok(Box::new(FakeSession {
            probe: self.probe.clone(),
            script: self.script.clone(),
            open: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct FakeSession {
    probe: Arc<Probe>,
    script: SessionScript,
    open: Arc<AtomicBool>,
}

fn shut(probe: &Probe, open: &AtomicBool) {
    if open.swap(false, Ordering::SeqCst) {
        probe.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeSession {
    /// Sleeps like a blocking browser call; returns false if the session
    /// was closed underneath it.
    fn block_for(&self, duration: Duration) -> bool {
        let started = Instant::now();
        while started.elapsed() < duration {
            if !self.open.load(Ordering::SeqCst) {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.open.load(Ordering::SeqCst)
    }
}

impl BrowserSession for FakeSession {
    fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), FetchError> {
        *self.probe.last_url.lock().unwrap() = Some(url.to_string());
        match &self.script {
            SessionScript::NavigationFails => {
                Err(FetchError::NavigationTimeout("net::ERR_TIMED_OUT".to_string()))
            }
            SessionScript::SlowNavigation(delay) => {
                if self.block_for(*delay) {
                    Ok(())
                } else {
                    Err(FetchError::Network("target closed".to_string()))
                }
            }
            _ => Ok(()),
        }
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), FetchError> {
        self.probe.selector_waits.fetch_add(1, Ordering::SeqCst);
        if let SessionScript::SelectorNeverAppears = self.script {
            self.block_for(timeout);
            return Err(FetchError::SelectorTimeout(selector.to_string()));
        }
        Ok(())
    }

    fn extract_rows(&mut self, _row_selector: &str) -> Result<Vec<RawRow>, FetchError> {
        match &self.script {
            SessionScript::Rows(rows) => Ok(rows.clone()),
            _ => Ok(Vec::new()),
        }
    }

    fn abort_handle(&self) -> AbortHandle {
        let probe = self.probe.clone();
        let open = self.open.clone();
        Arc::new(move || shut(&probe, &open))
    }

    fn close(&mut self) {
        shut(&self.probe, &self.open);
    }
}
