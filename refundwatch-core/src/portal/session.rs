//! One humanized browser session against a portal page.
//!
//! The session owns anti-detection behavior: locale/timezone/viewport
//! pinning, the webdriver mask, warm-up motion, jittered inter-action
//! delays, and pointer paths that land inside an element's box but never on
//! its exact center. Drivers compose these into form flows.

use std::sync::Mutex;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams,
    SetTimezoneOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::element::Element;
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use rand::Rng;
use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::portal::engine::{
    BrowserLauncher, LaunchedBrowser, TIMEZONE, USER_AGENT, VIEWPORT_HEIGHT,
    VIEWPORT_WIDTH, LOCALE, shutdown,
};

const WEBDRIVER_MASK: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || { runtime: {} };
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
"#;

/// A form field to fill, verify, or both.
#[derive(Debug, Clone)]
pub struct FormField {
    pub selector: &'static str,
    /// Name used in diagnostics when verification fails.
    pub label: &'static str,
    pub value: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Select,
}

#[derive(Debug, Deserialize)]
struct ElementRect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

pub struct PortalSession {
    launched: LaunchedBrowser,
    page: Page,
    element_timeout: Duration,
    /// Last simulated cursor position; pointer paths start here.
    cursor: Mutex<(f64, f64)>,
}

impl std::fmt::Debug for PortalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalSession").finish_non_exhaustive()
    }
}

impl PortalSession {
    /// Launches a fresh browser (never pooled), pins the environment, and
    /// navigates to the lookup page.
    pub async fn open(
        launcher: &BrowserLauncher,
        url: &str,
        element_timeout: Duration,
    ) -> Result<Self> {
        let launched = launcher.launch().await?;
        let page = match launched.browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                shutdown(launched).await;
                return Err(cdp("open page", err));
            }
        };

        let session = Self {
            launched,
            page,
            element_timeout,
            cursor: Mutex::new((
                f64::from(VIEWPORT_WIDTH) / 2.0,
                f64::from(VIEWPORT_HEIGHT) / 2.0,
            )),
        };

        if let Err(err) = session.pin_environment(launcher).await {
            session.close().await;
            return Err(err);
        }
        if let Err(err) = session.navigate(url).await {
            session.close().await;
            return Err(err);
        }
        Ok(session)
    }

    async fn pin_environment(&self, launcher: &BrowserLauncher) -> Result<()> {
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                i64::from(VIEWPORT_WIDTH),
                i64::from(VIEWPORT_HEIGHT),
                1.0,
                false,
            ))
            .await
            .map_err(|e| cdp("set viewport", e))?;
        self.page
            .execute(SetTimezoneOverrideParams::new(TIMEZONE))
            .await
            .map_err(|e| cdp("set timezone", e))?;
        self.page
            .execute(
                SetLocaleOverrideParams::builder().locale(LOCALE).build(),
            )
            .await
            .map_err(|e| cdp("set locale", e))?;
        self.page
            .execute(SetUserAgentOverrideParams::new(USER_AGENT))
            .await
            .map_err(|e| cdp("set user agent", e))?;
        if launcher.profile().mask_automation {
            self.page
                .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                    WEBDRIVER_MASK,
                ))
                .await
                .map_err(|e| cdp("install webdriver mask", e))?;
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| cdp("navigate", e))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| cdp("wait for navigation", e))?;
        Ok(())
    }

    /// Randomized scroll/mouse motion before the first real interaction.
    pub async fn warm_up(&self) -> Result<()> {
        let rounds = random_in(2, 4) as usize;
        for _ in 0..rounds {
            let (dx, dy) = (
                random_in(60, u64::from(VIEWPORT_WIDTH) - 60) as f64,
                random_in(60, u64::from(VIEWPORT_HEIGHT) - 60) as f64,
            );
            self.glide_to(dx, dy).await?;

            let scroll = random_in(40, 240) as i64;
            self.page
                .evaluate(format!("window.scrollBy(0, {scroll})"))
                .await
                .map_err(|e| cdp("warm-up scroll", e))?;
            self.pause().await;
        }
        // Settle back to the top so form selectors are in view.
        self.page
            .evaluate("window.scrollTo(0, 0)")
            .await
            .map_err(|e| cdp("warm-up scroll reset", e))?;
        self.pause().await;
        Ok(())
    }

    /// Waits for a selector to appear, bounded by the element timeout.
    pub async fn wait_for(&self, selector: &str) -> Result<Element> {
        let deadline = tokio::time::Instant::now() + self.element_timeout;
        loop {
            match self.page.find_element(selector).await {
                Ok(element) => return Ok(element),
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                Err(err) => {
                    return Err(CoreError::Internal(format!(
                        "element `{selector}` did not appear: {err}"
                    )));
                }
            }
        }
    }

    /// True once any of the selectors is present. Used for result-page
    /// detection where several panels are possible.
    pub async fn wait_for_any(
        &self,
        selectors: &[&'static str],
    ) -> Result<&'static str> {
        let deadline = tokio::time::Instant::now() + self.element_timeout;
        loop {
            for selector in selectors {
                if self.page.find_element(*selector).await.is_ok() {
                    return Ok(*selector);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::Internal(format!(
                    "none of the result selectors appeared: {selectors:?}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Moves the pointer to a randomized point inside the element's box
    /// (never its exact center) and clicks there.
    pub async fn humanized_click(&self, selector: &str) -> Result<()> {
        let element = self.wait_for(selector).await?;
        let target = self.off_center_point(&element, selector).await?;
        self.glide_to(target.x, target.y).await?;
        self.pause().await;
        self.page
            .click(target)
            .await
            .map_err(|e| cdp("click", e))?;
        self.pause().await;
        Ok(())
    }

    /// Clicks into a text field, clears it, and types the value with the
    /// usual key events.
    pub async fn fill_text(&self, field: &FormField) -> Result<()> {
        self.humanized_click(field.selector).await?;
        let element = self.wait_for(field.selector).await?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|e| cdp("clear field", e))?;
        element
            .type_str(&field.value)
            .await
            .map_err(|e| cdp("type into field", e))?;
        self.pause().await;
        Ok(())
    }

    /// Sets a `<select>` by value and fires the events a real change fires.
    pub async fn select_value(&self, field: &FormField) -> Result<()> {
        self.humanized_click(field.selector).await?;
        let element = self.wait_for(field.selector).await?;
        let encoded = serde_json::to_string(&field.value)?;
        let script = format!(
            "function() {{ this.value = {encoded}; \
             this.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             this.dispatchEvent(new Event('change', {{ bubbles: true }})); }}"
        );
        element
            .call_js_fn(script, false)
            .await
            .map_err(|e| cdp("select option", e))?;
        self.pause().await;
        Ok(())
    }

    pub async fn fill(&self, field: &FormField) -> Result<()> {
        match field.kind {
            FieldKind::Text => self.fill_text(field).await,
            FieldKind::Select => self.select_value(field).await,
        }
    }

    /// Reads a field's live value back out of the DOM.
    pub async fn field_value(&self, selector: &str) -> Result<String> {
        let element = self.wait_for(selector).await?;
        let value = element
            .property("value")
            .await
            .map_err(|e| cdp("read field value", e))?;
        Ok(value
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    /// Pre-submission gate: re-reads every field and aborts with a
    /// field-specific diagnostic on the first mismatch. The form is never
    /// submitted partially filled or stale.
    pub async fn verify_filled(&self, fields: &[FormField]) -> Result<()> {
        for field in fields {
            let live = self.field_value(field.selector).await?;
            if live != field.value {
                return Err(CoreError::Internal(format!(
                    "field `{}` holds `{}` but `{}` was intended; aborting \
                     before submit",
                    field.label, live, field.value
                )));
            }
        }
        Ok(())
    }

    pub async fn page_text(&self) -> Result<String> {
        let text: String = self
            .page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .map_err(|e| cdp("read page text", e))?
            .into_value()
            .map_err(|err| {
                CoreError::Internal(format!(
                    "page text was not a string: {err}"
                ))
            })?;
        Ok(text)
    }

    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(|e| cdp("capture screenshot", e))
    }

    /// Closes the browser. Called on every exit path.
    pub async fn close(self) {
        shutdown(self.launched).await;
    }

    async fn off_center_point(
        &self,
        element: &Element,
        selector: &str,
    ) -> Result<Point> {
        let returned = element
            .call_js_fn(
                "function() { const r = this.getBoundingClientRect(); \
                 return JSON.stringify({x: r.x, y: r.y, w: r.width, \
                 h: r.height}); }",
                false,
            )
            .await
            .map_err(|e| cdp("read element box", e))?;

        let rect: ElementRect = returned
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .and_then(|s| serde_json::from_str(s).ok())
            .ok_or_else(|| {
                CoreError::Internal(format!(
                    "element `{selector}` has no usable bounding box"
                ))
            })?;

        if rect.w < 2.0 || rect.h < 2.0 {
            return Err(CoreError::Internal(format!(
                "element `{selector}` is not visible"
            )));
        }

        Ok(pick_inside(&rect))
    }

    /// Moves the simulated pointer along a noisy path to (x, y).
    async fn glide_to(&self, x: f64, y: f64) -> Result<()> {
        let path = {
            let from = *self.cursor.lock().expect("cursor lock");
            pointer_path(from, (x, y))
        };
        for point in path {
            self.page
                .move_mouse(point)
                .await
                .map_err(|e| cdp("move mouse", e))?;
            tokio::time::sleep(Duration::from_millis(random_in(15, 45)))
                .await;
        }
        *self.cursor.lock().expect("cursor lock") = (x, y);
        Ok(())
    }

    /// Randomized inter-action delay.
    async fn pause(&self) {
        tokio::time::sleep(Duration::from_millis(random_in(120, 480))).await;
    }
}

fn cdp(context: &str, err: impl std::fmt::Display) -> CoreError {
    CoreError::Internal(format!("{context}: {err}"))
}

fn random_in(lo: u64, hi: u64) -> u64 {
    rand::rng().random_range(lo..=hi)
}

fn random_f(lo: f64, hi: f64) -> f64 {
    rand::rng().random_range(lo..hi)
}

/// Picks a point inside the inner 60% of the box, nudged off the exact
/// center.
fn pick_inside(rect: &ElementRect) -> Point {
    let cx = rect.x + rect.w / 2.0;
    let cy = rect.y + rect.h / 2.0;
    let mut x = rect.x + rect.w * random_f(0.2, 0.8);
    let mut y = rect.y + rect.h * random_f(0.2, 0.8);
    if (x - cx).abs() < 1.0 {
        x += if rect.w > 8.0 { 2.0 } else { 0.5 };
    }
    if (y - cy).abs() < 1.0 {
        y += if rect.h > 8.0 { 2.0 } else { 0.5 };
    }
    Point::new(x, y)
}

/// Interpolated pointer path with per-step noise.
fn pointer_path(from: (f64, f64), to: (f64, f64)) -> Vec<Point> {
    let steps = random_in(3, 6) as usize;
    let mut path = Vec::with_capacity(steps + 1);
    for step in 1..=steps {
        let t = step as f64 / (steps + 1) as f64;
        let noise_x = random_f(-4.0, 4.0);
        let noise_y = random_f(-4.0, 4.0);
        path.push(Point::new(
            from.0 + (to.0 - from.0) * t + noise_x,
            from.1 + (to.1 - from.1) * t + noise_y,
        ));
    }
    path.push(Point::new(to.0, to.1));
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picked_point_stays_inside_and_off_center() {
        let rect = ElementRect {
            x: 100.0,
            y: 200.0,
            w: 120.0,
            h: 40.0,
        };
        for _ in 0..200 {
            let p = pick_inside(&rect);
            assert!(p.x > rect.x && p.x < rect.x + rect.w);
            assert!(p.y > rect.y && p.y < rect.y + rect.h);
            let off_center = (p.x - 160.0).abs() >= 1.0
                || (p.y - 220.0).abs() >= 1.0;
            assert!(off_center, "landed on the exact center");
        }
    }

    #[test]
    fn pointer_path_ends_at_target() {
        let path = pointer_path((0.0, 0.0), (300.0, 150.0));
        let last = path.last().expect("non-empty path");
        assert_eq!((last.x, last.y), (300.0, 150.0));
        assert!(path.len() >= 4);
    }
}
