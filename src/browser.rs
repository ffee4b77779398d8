use headless_chrome::protocol::cdp::Page;
use headless_chrome::util::Timeout;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::headers::HeaderProfile;
use crate::normalize::{clean_cell, RawRow};
use crate::registry::SiteAdapter;

/// Headroom on top of the navigation and selector budgets for launching
/// Chrome and reading the rows back.
const LAUNCH_ALLOWANCE: Duration = Duration::from_secs(20);

/// Network counts as settled after this long without a new resource entry.
const NETWORK_QUIET_MS: u64 = 500;

/// Longest single blocking wait on a Chrome tab before checking for abort.
const POLL_SLICE: Duration = Duration::from_millis(250);

// Runs before any page script. Hides the automation flags tracker sites
// probe for.
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 8 });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3] });

    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter.apply(this, [parameter]);
    };
    window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTimeouts {
    /// Load event plus network settle.
    pub navigation: Duration,
    pub selector: Duration,
}

impl Default for RenderTimeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_millis(60_000),
            selector: Duration::from_millis(30_000),
        }
    }
}

impl RenderTimeouts {
    fn overall(&self) -> Duration {
        self.navigation + self.selector + LAUNCH_ALLOWANCE
    }
}

/// Tears a live session down from any thread. A blocking session call in
/// flight on another thread fails soon after.
pub type AbortHandle = Arc<dyn Fn() + Send + Sync>;

/// Starts one isolated browser per call. Sessions are never shared between
/// scrapes.
pub trait BrowserLauncher: Send + Sync {
    fn launch(&self, headers: &HeaderProfile) -> Result<Box<dyn BrowserSession>, FetchError>;
}

/// A live page. Every method blocks; callers run sessions on the blocking
/// pool.
pub trait BrowserSession {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), FetchError>;
    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), FetchError>;
    fn extract_rows(&mut self, row_selector: &str) -> Result<Vec<RawRow>, FetchError>;
    fn abort_handle(&self) -> AbortHandle;
    /// Must be safe to call more than once, and after an abort.
    fn close(&mut self);
}

/// Owns a session and closes it on every exit path.
struct SessionGuard(Box<dyn BrowserSession>);

impl Deref for SessionGuard {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Launch,
    Navigate,
    WaitSelector,
    Extract,
}

impl Stage {
    const ORDER: [Stage; 4] = [
        Stage::Launch,
        Stage::Navigate,
        Stage::WaitSelector,
        Stage::Extract,
    ];
}

/// State shared by the async caller and the blocking worker of one render.
#[derive(Default)]
struct RenderControl {
    cancelled: AtomicBool,
    stage: AtomicU8,
    abort: Mutex<Option<AbortHandle>>,
}

impl RenderControl {
    /// Record the stage the worker is starting; fails once cancelled.
    fn enter(&self, stage: Stage) -> Result<(), FetchError> {
        self.stage.store(stage as u8, Ordering::SeqCst);
        if self.is_cancelled() {
            Err(FetchError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn stage(&self) -> Stage {
        let at = self.stage.load(Ordering::SeqCst) as usize;
        Stage::ORDER.get(at).copied().unwrap_or(Stage::Launch)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn abort_slot(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.abort.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, handle: AbortHandle) {
        *self.abort_slot() = Some(handle);
    }

    fn disarm(&self) {
        self.abort_slot().take();
    }

    /// Flag the worker and kill its live session, if any.
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let handle = self.abort_slot().take();
        if let Some(abort) = handle {
            debug!(stage = ?self.stage(), "aborting browser session");
            abort();
        }
    }

    fn timeout_error(&self, row_selector: &str, overall: Duration) -> FetchError {
        match self.stage() {
            Stage::Launch | Stage::Navigate => {
                FetchError::NavigationTimeout(format!("rendered fetch exceeded {overall:?}"))
            }
            Stage::WaitSelector => FetchError::SelectorTimeout(row_selector.to_string()),
            Stage::Extract => {
                FetchError::Extraction(format!("row extraction exceeded {overall:?}"))
            }
        }
    }
}

/// Cancels the render when the async caller goes away.
struct CancelOnDrop(Arc<RenderControl>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Load `adapter.url` in a fresh browser and read the cells of every row
/// matching `adapter.row_selector`.
///
/// The browser work runs on tokio's blocking pool. Dropping the returned
/// future (request cancelled, outer timeout) aborts the live session at
/// once, and the session is torn down on every path.
pub async fn fetch_rendered(
    launcher: Arc<dyn BrowserLauncher>,
    adapter: &SiteAdapter,
    headers: &HeaderProfile,
    timeouts: RenderTimeouts,
) -> Result<Vec<RawRow>, FetchError> {
    let control = Arc::new(RenderControl::default());
    let _cancel_on_drop = CancelOnDrop(control.clone());

    let job = RenderJob {
        url: adapter.url.clone(),
        row_selector: adapter.row_selector.clone(),
        skip_rows: adapter.skip_rows,
        headers: headers.clone(),
        timeouts,
    };
    let worker_control = control.clone();
    let worker = tokio::task::spawn_blocking(move || job.run(launcher.as_ref(), &worker_control));

    let overall = timeouts.overall();
    match tokio::time::timeout(overall, worker).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(FetchError::Extraction(format!(
            "browser worker failed: {join_err}"
        ))),
        Err(_) => Err(control.timeout_error(&adapter.row_selector, overall)),
    }
}

struct RenderJob {
    url: String,
    row_selector: String,
    skip_rows: usize,
    headers: HeaderProfile,
    timeouts: RenderTimeouts,
}

impl RenderJob {
    fn run(
        self,
        launcher: &dyn BrowserLauncher,
        control: &RenderControl,
    ) -> Result<Vec<RawRow>, FetchError> {
        control.enter(Stage::Launch)?;
        let mut session = SessionGuard(launcher.launch(&self.headers)?);
        control.arm(session.abort_handle());

        let result = self.drive(&mut session, control);
        control.disarm();
        drop(session);

        match result {
            Err(_) if control.is_cancelled() => Err(FetchError::Cancelled),
            other => other,
        }
    }

    fn drive(
        &self,
        session: &mut SessionGuard,
        control: &RenderControl,
    ) -> Result<Vec<RawRow>, FetchError> {
        control.enter(Stage::Navigate)?;
        debug!(url = %self.url, "navigating");
        session.navigate(&self.url, self.timeouts.navigation)?;

        control.enter(Stage::WaitSelector)?;
        session.wait_for_selector(&self.row_selector, self.timeouts.selector)?;

        control.enter(Stage::Extract)?;
        let rows: Vec<RawRow> = session
            .extract_rows(&self.row_selector)?
            .into_iter()
            .skip(self.skip_rows)
            .collect();
        if rows.is_empty() {
            return Err(FetchError::EmptyResultSet);
        }
        Ok(rows)
    }
}

pub struct ChromeLauncher {
    headless: bool,
    sandbox: bool,
    idle_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(headless: bool, sandbox: bool, timeouts: RenderTimeouts) -> Self {
        Self {
            headless,
            sandbox,
            // Chrome drops idle connections; a quiet selector wait must not
            // count as idle.
            idle_timeout: timeouts.overall(),
        }
    }
}

impl BrowserLauncher for ChromeLauncher {
    fn launch(&self, headers: &HeaderProfile) -> Result<Box<dyn BrowserSession>, FetchError> {
        let launch_failed = |e: anyhow::Error| FetchError::LaunchFailure(e.to_string());

        let ua_arg = format!("--user-agent={}", headers.user_agent);
        let lang = headers
            .accept_language
            .split(',')
            .next()
            .unwrap_or("en-US")
            .trim();
        let lang_arg = format!("--lang={lang}");
        let args = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--no-first-run"),
            OsStr::new("--mute-audio"),
            OsStr::new(&ua_arg),
            OsStr::new(&lang_arg),
        ];

        let options = LaunchOptions::default_builder()
            .headless(self.headless)
            .sandbox(self.sandbox)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(self.idle_timeout)
            .args(args)
            .build()
            .map_err(|e| FetchError::LaunchFailure(e.to_string()))?;

        let browser = Browser::new(options).map_err(launch_failed)?;
        let tab = browser.new_tab().map_err(launch_failed)?;
        tab.set_user_agent(&headers.user_agent, Some(&headers.accept_language), None)
            .map_err(launch_failed)?;
        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: STEALTH_SCRIPT.to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })
        .map_err(launch_failed)?;

        info!("🧭 browser session launched");
        Ok(Box::new(ChromeSession {
            browser: Arc::new(Mutex::new(Some(browser))),
            aborted: Arc::new(AtomicBool::new(false)),
            tab: Some(tab),
        }))
    }
}

struct ChromeSession {
    browser: Arc<Mutex<Option<Browser>>>,
    aborted: Arc<AtomicBool>,
    tab: Option<Arc<Tab>>,
}

enum Waited<T> {
    Done(T),
    TimedOut,
    Aborted,
}

impl ChromeSession {
    fn tab(&self) -> Result<Arc<Tab>, FetchError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(FetchError::Cancelled);
        }
        self.tab
            .clone()
            .ok_or_else(|| FetchError::Extraction("session already closed".to_string()))
    }

    /// Retry `attempt` in slices of at most `POLL_SLICE` until it succeeds,
    /// fails with anything but a timeout, the session is aborted or
    /// `timeout` runs out.
    fn wait_sliced<T>(
        &self,
        timeout: Duration,
        mut attempt: impl FnMut(Duration) -> anyhow::Result<T>,
    ) -> anyhow::Result<Waited<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                return Ok(Waited::Aborted);
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(Waited::TimedOut);
            }
            match attempt(left.min(POLL_SLICE)) {
                Ok(value) => return Ok(Waited::Done(value)),
                Err(e) if e.is::<Timeout>() => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Timeouts stay timeouts; DNS, connection and protocol failures are
/// network errors.
fn navigation_failed(err: anyhow::Error) -> FetchError {
    if err.is::<Timeout>() {
        FetchError::NavigationTimeout(err.to_string())
    } else {
        FetchError::Network(err.to_string())
    }
}

/// Drops the browser if still held. Dropping it kills the Chrome process.
fn shutdown_browser(slot: &Mutex<Option<Browser>>) -> bool {
    let browser = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    browser.is_some()
}

impl BrowserSession for ChromeSession {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), FetchError> {
        let started = Instant::now();
        let tab = self.tab()?;
        tab.navigate_to(url).map_err(navigation_failed)?;

        let waited = self.wait_sliced(timeout, |slice| {
            tab.set_default_timeout(slice);
            tab.wait_until_navigated().map(|_| ())
        });
        tab.set_default_timeout(timeout);
        match waited {
            Ok(Waited::Done(())) => {}
            Ok(Waited::TimedOut) => {
                return Err(FetchError::NavigationTimeout(format!(
                    "{url} did not load within {timeout:?}"
                )))
            }
            Ok(Waited::Aborted) => return Err(FetchError::Cancelled),
            Err(e) => return Err(navigation_failed(e)),
        }

        // Tracker pages keep fetching after the load event; give them until
        // the resource list stops growing.
        let budget = timeout.saturating_sub(started.elapsed());
        match tab.evaluate(&network_settle_script(budget), true) {
            Ok(result) => debug!(resources = ?result.value, "network settled"),
            Err(e) => warn!(error = %e, "network settle wait failed, continuing"),
        }
        Ok(())
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), FetchError> {
        let tab = self.tab()?;
        let waited = self.wait_sliced(timeout, |slice| {
            tab.wait_for_element_with_custom_timeout(selector, slice)
                .map(|_| ())
        });
        match waited {
            Ok(Waited::Done(())) => Ok(()),
            Ok(Waited::TimedOut) => Err(FetchError::SelectorTimeout(selector.to_string())),
            Ok(Waited::Aborted) => Err(FetchError::Cancelled),
            Err(e) => Err(FetchError::Extraction(e.to_string())),
        }
    }

    fn extract_rows(&mut self, row_selector: &str) -> Result<Vec<RawRow>, FetchError> {
        let script = row_extraction_script(row_selector)?;
        let result = self
            .tab()?
            .evaluate(&script, false)
            .map_err(|e| FetchError::Extraction(e.to_string()))?;
        match result.value {
            Some(serde_json::Value::String(json)) => parse_extracted_rows(&json),
            other => Err(FetchError::Extraction(format!(
                "unexpected evaluation result: {other:?}"
            ))),
        }
    }

    fn abort_handle(&self) -> AbortHandle {
        let browser = self.browser.clone();
        let aborted = self.aborted.clone();
        Arc::new(move || {
            aborted.store(true, Ordering::SeqCst);
            if shutdown_browser(&browser) {
                info!("browser session aborted");
            }
        })
    }

    fn close(&mut self) {
        if let Some(tab) = self.tab.take() {
            if !self.aborted.load(Ordering::SeqCst) {
                if let Err(e) = tab.close(true) {
                    debug!(error = %e, "tab close failed");
                }
            }
        }
        if shutdown_browser(&self.browser) {
            info!("browser session closed");
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.close();
    }
}


fn network_settle_script(budget: Duration) -> String {
    format!(
        r#"
        new Promise((resolve) => {{
            const started = Date.now();
            let seen = performance.getEntriesByType('resource').length;
            let quietSince = Date.now();
            const timer = setInterval(() => {{
                const now = performance.getEntriesByType('resource').length;
                if (now !== seen) {{
                    seen = now;
                    quietSince = Date.now();
                }}
                if (Date.now() - quietSince >= {quiet} || Date.now() - started >= {budget}) {{
                    clearInterval(timer);
                    resolve(seen);
                }}
            }}, 100);
        }})
        "#,
        quiet = NETWORK_QUIET_MS,
        budget = budget.as_millis(),
    )
}

fn row_extraction_script(row_selector: &str) -> Result<String, FetchError> {
    let quoted =
        serde_json::to_string(row_selector).map_err(|e| FetchError::Extraction(e.to_string()))?;
    Ok(format!(
        r#"JSON.stringify(Array.from(document.querySelectorAll({quoted})).map(row => Array.from(row.querySelectorAll('td')).map(td => td.innerText)))"#
    ))
}

fn parse_extracted_rows(json: &str) -> Result<Vec<RawRow>, FetchError> {
    let rows: Vec<RawRow> =
        serde_json::from_str(json).map_err(|e| FetchError::Extraction(e.to_string()))?;
    Ok(rows
        .into_iter()
        .map(|row| RawRow::new(row.cells.iter().map(|c| clean_cell(c))))
        .collect())
}
