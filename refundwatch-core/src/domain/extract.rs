//! Status extraction from a captured result page.
//!
//! Primary path sends the screenshot to a vision-capable model and parses
//! the first JSON object out of its free-text reply. Fallback path scans the
//! rendered page text against ordered phrase groups. The extractor never
//! fails hard; a vision outage only degrades extraction quality.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use refundwatch_model::{CheckResult, Portal};

use crate::error::Result;

/// Port to a vision-capable model. Single-turn: one image, one instruction,
/// free text back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe_screenshot(
        &self,
        image_png: &[u8],
        instruction: &str,
    ) -> Result<String>;
}

/// What one extraction produced. `result` is only ever `Success`,
/// `NotFound`, or `Error` (a structurally unreadable page); timeouts are
/// classified upstream by the automator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub raw_status: String,
    pub details: String,
    pub result: CheckResult,
    pub error_message: Option<String>,
}

/// Validated shape of the model's JSON answer. Any missing field fails the
/// parse and falls through to the text path; partial data is never trusted.
#[derive(Debug, Deserialize)]
struct VisionAnswer {
    status: String,
    #[serde(default)]
    details: String,
    found: bool,
}

struct PhrasePattern {
    pattern: Lazy<Regex>,
    label: &'static str,
    not_found: bool,
}

macro_rules! phrase {
    ($re:expr, $label:expr, $not_found:expr) => {
        PhrasePattern {
            pattern: Lazy::new(|| {
                Regex::new($re).expect("phrase pattern should compile")
            }),
            label: $label,
            not_found: $not_found,
        }
    };
}

/// Ordered: first match wins. Not-found wording sits above status wording
/// because portals render both on the same shell page.
static FEDERAL_PHRASES: [PhrasePattern; 8] = [
    phrase!(
        r"(?i)we cannot provide any information about your refund",
        "No record found",
        true
    ),
    phrase!(
        r"(?i)information (does not match|you entered is incorrect)",
        "No record found",
        true
    ),
    phrase!(r"(?i)refund\s+sent", "Refund Sent", false),
    phrase!(r"(?i)refund\s+approved", "Refund Approved", false),
    phrase!(r"(?i)return\s+received", "Return Received", false),
    phrase!(
        r"(?i)still being processed",
        "Return Received",
        false
    ),
    phrase!(
        r"(?i)(verify your identity|identity verification)",
        "Identity verification required",
        false
    ),
    phrase!(
        r"(?i)(take action|contact us|additional information)",
        "Action required",
        false
    ),
];

static STATE_PHRASES: [PhrasePattern; 6] = [
    phrase!(
        r"(?i)(no record of|unable to locate|not available at this time)",
        "No record found",
        true
    ),
    phrase!(
        r"(?i)refund (has been )?(issued|sent|deposited|mailed)",
        "Refund Issued",
        false
    ),
    phrase!(r"(?i)refund (has been )?approved", "Approved", false),
    phrase!(r"(?i)under review", "Under Review", false),
    phrase!(
        r"(?i)(received your return|return has been received|processing)",
        "Processing",
        false
    ),
    phrase!(
        r"(?i)(contact the department|additional information|cannot process)",
        "Action required",
        false
    ),
];

const FEDERAL_LABELS: &str =
    "\"Return Received\", \"Refund Approved\", \"Refund Sent\", \
     \"Identity verification required\", \"Action required\", \
     \"No record found\"";
const STATE_LABELS: &str =
    "\"Processing\", \"Under Review\", \"Approved\", \"Refund Issued\", \
     \"Action required\", \"No record found\"";

/// Multi-stage extractor: vision first when a screenshot and a model are
/// both available, deterministic phrase scan otherwise.
#[derive(Clone)]
pub struct StatusExtractor {
    vision: Option<Arc<dyn VisionModel>>,
}

impl std::fmt::Debug for StatusExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusExtractor")
            .field("vision", &self.vision.is_some())
            .finish()
    }
}

impl StatusExtractor {
    pub fn new(vision: Option<Arc<dyn VisionModel>>) -> Self {
        Self { vision }
    }

    pub async fn extract(
        &self,
        portal: Portal,
        screenshot: Option<&[u8]>,
        page_text: &str,
    ) -> Extraction {
        if let (Some(vision), Some(image)) = (&self.vision, screenshot) {
            match self.extract_via_vision(vision, portal, image).await {
                Some(extraction) => return extraction,
                None => {
                    warn!(
                        portal = %portal,
                        "vision extraction failed, using text fallback"
                    );
                }
            }
        }

        extract_from_text(portal, page_text)
    }

    async fn extract_via_vision(
        &self,
        vision: &Arc<dyn VisionModel>,
        portal: Portal,
        image: &[u8],
    ) -> Option<Extraction> {
        let instruction = vision_instruction(portal);
        let reply = match vision.describe_screenshot(image, &instruction).await
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!(portal = %portal, error = %err, "vision call failed");
                return None;
            }
        };

        let answer = parse_vision_answer(&reply)?;
        debug!(
            portal = %portal,
            status = %answer.status,
            found = answer.found,
            "vision extraction parsed"
        );

        Some(if answer.found {
            Extraction {
                raw_status: answer.status,
                details: answer.details,
                result: CheckResult::Success,
                error_message: None,
            }
        } else {
            Extraction {
                raw_status: answer.status,
                details: answer.details,
                result: CheckResult::NotFound,
                error_message: None,
            }
        })
    }
}

fn vision_instruction(portal: Portal) -> String {
    let labels = match portal {
        Portal::Federal => FEDERAL_LABELS,
        Portal::State => STATE_LABELS,
    };
    format!(
        "You are reading a screenshot of a government tax-refund lookup \
         result page. Answer with a single JSON object and nothing else: \
         {{\"status\": <one of {labels}>, \"details\": <short free-text \
         summary of any dates or amounts shown>, \"found\": <false only if \
         the page says no matching record exists>}}."
    )
}

/// Pulls the first balanced brace-delimited block out of free text and
/// deserializes it. Models wrap their JSON in prose often enough that a
/// plain `serde_json::from_str` on the whole reply is useless.
fn parse_vision_answer(reply: &str) -> Option<VisionAnswer> {
    let block = first_json_object(reply)?;
    let answer: VisionAnswer = serde_json::from_str(block).ok()?;
    if answer.status.trim().is_empty() {
        return None;
    }
    Some(answer)
}

fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Deterministic fallback: ordered phrase groups over the rendered text.
fn extract_from_text(portal: Portal, page_text: &str) -> Extraction {
    let phrases: &[PhrasePattern] = match portal {
        Portal::Federal => &FEDERAL_PHRASES,
        Portal::State => &STATE_PHRASES,
    };

    for phrase in phrases {
        if let Some(found) = phrase.pattern.find(page_text) {
            let details = surrounding_line(page_text, found.start());
            return Extraction {
                raw_status: phrase.label.to_string(),
                details,
                result: if phrase.not_found {
                    CheckResult::NotFound
                } else {
                    CheckResult::Success
                },
                error_message: None,
            };
        }
    }

    // Neither path recognized the page: structural mismatch, retryable.
    Extraction {
        raw_status: String::new(),
        details: snippet(page_text, 200),
        result: CheckResult::Error,
        error_message: Some(
            "no recognizable status on result page".to_string(),
        ),
    }
}

fn surrounding_line(text: &str, at: usize) -> String {
    let start = text[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[at..]
        .find('\n')
        .map(|i| at + i)
        .unwrap_or(text.len());
    snippet(text[start..end].trim(), 300)
}

fn snippet(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}
