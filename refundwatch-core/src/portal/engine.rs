//! Browser launch profiles and their ordered fallback.
//!
//! Two profiles share one CDP engine: the stealth profile strips the
//! automation tells (blink automation flag, `navigator.webdriver`, a
//! real-browser user agent), the plain profile launches stock. The working
//! profile is resolved once at startup with a probe launch and reused for
//! every session afterwards.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::Handler;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{CoreError, Result};

pub const VIEWPORT_WIDTH: u32 = 1366;
pub const VIEWPORT_HEIGHT: u32 = 768;
pub const LOCALE: &str = "en-US";
pub const TIMEZONE: &str = "America/New_York";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// One way of launching the engine.
#[derive(Debug, Clone)]
pub struct EngineProfile {
    pub name: &'static str,
    args: Vec<String>,
    /// Install the `navigator.webdriver` masking script on new documents.
    pub mask_automation: bool,
}

impl EngineProfile {
    pub fn stealth() -> Self {
        Self {
            name: "stealth",
            args: vec![
                "--disable-blink-features=AutomationControlled".to_string(),
                format!("--user-agent={USER_AGENT}"),
                format!("--lang={LOCALE}"),
                "--disable-infobars".to_string(),
                "--no-first-run".to_string(),
            ],
            mask_automation: true,
        }
    }

    pub fn plain() -> Self {
        Self {
            name: "plain",
            args: vec!["--no-first-run".to_string()],
            mask_automation: false,
        }
    }

    /// Default fallback order: stealth first, stock engine second.
    pub fn default_order() -> Vec<Self> {
        vec![Self::stealth(), Self::plain()]
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT);
        for arg in &self.args {
            builder = builder.arg(arg.clone());
        }
        builder.build().map_err(|err| {
            CoreError::Internal(format!(
                "browser config for `{}` profile rejected: {err}",
                self.name
            ))
        })
    }
}

/// A launched browser plus the CDP event loop driving it.
pub struct LaunchedBrowser {
    pub browser: Browser,
    pub handler_task: JoinHandle<()>,
}

impl std::fmt::Debug for LaunchedBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedBrowser").finish_non_exhaustive()
    }
}

/// Launches browsers with the profile that was proven to work at startup.
#[derive(Debug)]
pub struct BrowserLauncher {
    profile: EngineProfile,
}

impl BrowserLauncher {
    /// Probes the given profiles in order and keeps the first one that
    /// launches. Hard failure only when none does.
    pub async fn resolve(profiles: Vec<EngineProfile>) -> Result<Self> {
        for profile in profiles {
            match launch_with(&profile).await {
                Ok(launched) => {
                    info!(profile = profile.name, "browser profile resolved");
                    shutdown(launched).await;
                    return Ok(Self { profile });
                }
                Err(err) => {
                    warn!(
                        profile = profile.name,
                        error = %err,
                        "browser profile unavailable, trying next"
                    );
                }
            }
        }
        Err(CoreError::Internal(
            "no browser launch profile is usable on this host".to_string(),
        ))
    }

    pub fn profile(&self) -> &EngineProfile {
        &self.profile
    }

    pub async fn launch(&self) -> Result<LaunchedBrowser> {
        launch_with(&self.profile).await
    }
}

async fn launch_with(profile: &EngineProfile) -> Result<LaunchedBrowser> {
    let config = profile.browser_config()?;
    let (browser, handler) =
        Browser::launch(config).await.map_err(|err| {
            CoreError::Internal(format!(
                "failed to launch browser with `{}` profile: {err}",
                profile.name
            ))
        })?;
    let handler_task = tokio::spawn(drive_handler(handler));
    Ok(LaunchedBrowser {
        browser,
        handler_task,
    })
}

async fn drive_handler(mut handler: Handler) {
    while let Some(event) = handler.next().await {
        if let Err(err) = event {
            warn!(error = %err, "CDP event loop error");
        }
    }
}

/// Best-effort teardown used by the probe launch and by sessions.
pub(crate) async fn shutdown(mut launched: LaunchedBrowser) {
    if let Err(err) = launched.browser.close().await {
        warn!(error = %err, "browser close failed");
    }
    let _ = launched.browser.wait().await;
    launched.handler_task.abort();
}
