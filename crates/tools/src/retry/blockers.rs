//! Detection of transient page obstructions (cookie banners, modal dialogs,
//! signup overlays) and the action that dismisses each.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use pagepilot_core::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One element reported by the page probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeElement {
    pub selector: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Selector of the dialog or overlay this element sits in.
    #[serde(default)]
    pub container: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl ProbeElement {
    pub fn new(selector: &str, text: &str) -> Self {
        Self {
            selector: selector.to_string(),
            text: text.to_string(),
            attributes: HashMap::new(),
            visible: true,
            container: None,
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn inside(mut self, container: &str) -> Self {
        self.container = Some(container.to_string());
        self
    }

    fn normalized_text(&self) -> String {
        self.text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    /// Text, id, class and aria-label joined for keyword matching.
    fn haystack(&self) -> String {
        let mut parts = vec![self.text.to_lowercase()];
        for key in ["id", "class", "aria-label", "name"] {
            if let Some(v) = self.attributes.get(key) {
                parts.push(v.to_lowercase());
            }
        }
        parts.join(" ")
    }
}

/// Snapshot of potentially obstructing elements on the current page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageProbe {
    #[serde(default)]
    pub buttons: Vec<ProbeElement>,
    #[serde(default)]
    pub dialogs: Vec<ProbeElement>,
    #[serde(default)]
    pub overlays: Vec<ProbeElement>,
}

impl PageProbe {
    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty() && self.dialogs.is_empty() && self.overlays.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DismissAction {
    Click { selector: String },
    PressKey { key: String },
    /// Hide the element via a style mutation.
    Hide { selector: String },
}

/// Applies dismiss actions in the live page.
#[async_trait]
pub trait BlockerHost: Send + Sync {
    async fn probe(&self) -> Result<PageProbe>;
    async fn apply(&self, action: &DismissAction) -> Result<()>;
}

pub trait BlockerStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn detect(&self, probe: &PageProbe) -> Option<DismissAction>;
}

// ─── Cookie consent ───────────────────────────────────────────────────────────

const CONSENT_PHRASES: &[&str] = &[
    "accept all",
    "accept all cookies",
    "accept cookies",
    "allow all",
    "allow cookies",
    "i agree",
    "agree",
    "i accept",
    "accept",
    "got it",
    "ok",
    "okay",
    "consent",
];

static CONSENT_CONTEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"cookie|consent|gdpr|privacy|onetrust|cmp").expect("consent context regex is valid")
});

/// Clicks the first visible button whose label is a consent phrase. Buttons
/// inside a cookie/consent container are preferred.
pub struct CookieConsentStrategy {
    phrases: Vec<String>,
}

impl CookieConsentStrategy {
    pub fn new() -> Self {
        Self {
            phrases: CONSENT_PHRASES.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn with_phrases(phrases: Vec<String>) -> Self {
        Self {
            phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.phrases
            .iter()
            .any(|p| text == p || (p.contains(' ') && text.contains(p.as_str())))
    }
}

impl Default for CookieConsentStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockerStrategy for CookieConsentStrategy {
    fn name(&self) -> &str {
        "cookie_consent"
    }

    fn detect(&self, probe: &PageProbe) -> Option<DismissAction> {
        let candidates: Vec<&ProbeElement> = probe
            .buttons
            .iter()
            .filter(|b| b.visible && self.matches(&b.normalized_text()))
            .collect();

        let in_consent_container = candidates.iter().find(|b| {
            CONSENT_CONTEXT.is_match(&b.haystack())
                || b.container
                    .as_deref()
                    .map(|c| CONSENT_CONTEXT.is_match(&c.to_lowercase()))
                    .unwrap_or(false)
        });

        in_consent_container
            .or_else(|| candidates.first())
            .map(|b| DismissAction::Click {
                selector: b.selector.clone(),
            })
    }
}

// ─── Modal dialogs ────────────────────────────────────────────────────────────

static CLOSE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(×|✕|x|close|dismiss|no thanks|not now|cancel|maybe later)$").expect("close label regex is valid")
});

/// Clicks a close button inside a visible dialog, or presses Escape.
#[derive(Default)]
pub struct ModalDialogStrategy;

impl BlockerStrategy for ModalDialogStrategy {
    fn name(&self) -> &str {
        "modal_dialog"
    }

    fn detect(&self, probe: &PageProbe) -> Option<DismissAction> {
        let dialog = probe.dialogs.iter().find(|d| d.visible)?;

        let close_button = probe.buttons.iter().find(|b| {
            b.visible
                && b.container.as_deref() == Some(dialog.selector.as_str())
                && (CLOSE_LABEL.is_match(&b.normalized_text())
                    || b.attributes
                        .get("aria-label")
                        .map(|l| l.to_lowercase().contains("close"))
                        .unwrap_or(false))
        });

        Some(match close_button {
            Some(button) => DismissAction::Click {
                selector: button.selector.clone(),
            },
            None => DismissAction::PressKey {
                key: "Escape".to_string(),
            },
        })
    }
}

// ─── Signup / newsletter overlays ─────────────────────────────────────────────

static SIGNUP_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"newsletter|subscribe|sign[\s_-]?up|register|join (us|now)|paywall|modal-backdrop")
        .expect("signup hint regex is valid")
});

/// Hides visible overlays that look like signup or newsletter prompts.
#[derive(Default)]
pub struct SignupOverlayStrategy;

impl BlockerStrategy for SignupOverlayStrategy {
    fn name(&self) -> &str {
        "signup_overlay"
    }

    fn detect(&self, probe: &PageProbe) -> Option<DismissAction> {
        probe
            .overlays
            .iter()
            .find(|o| o.visible && SIGNUP_HINT.is_match(&o.haystack()))
            .map(|o| DismissAction::Hide {
                selector: o.selector.clone(),
            })
    }
}

/// Strategies in the order they are tried.
pub fn default_strategies() -> Vec<Box<dyn BlockerStrategy>> {
    vec![
        Box::new(CookieConsentStrategy::new()),
        Box::new(ModalDialogStrategy),
        Box::new(SignupOverlayStrategy),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_prefers_consent_container() {
        let probe = PageProbe {
            buttons: vec![
                ProbeElement::new("#newsletter-ok", "OK"),
                ProbeElement::new("#onetrust-accept", "Accept All").with_attr("id", "onetrust-accept-btn"),
            ],
            ..Default::default()
        };
        assert_eq!(
            CookieConsentStrategy::new().detect(&probe),
            Some(DismissAction::Click { selector: "#onetrust-accept".into() })
        );
    }

    #[test]
    fn test_cookie_ignores_unrelated_buttons() {
        let probe = PageProbe {
            buttons: vec![ProbeElement::new("#book", "Book now"), ProbeElement::new("#search", "Search")],
            ..Default::default()
        };
        assert_eq!(CookieConsentStrategy::new().detect(&probe), None);
    }

    #[test]
    fn test_cookie_skips_hidden() {
        let mut hidden = ProbeElement::new("#accept", "Accept");
        hidden.visible = false;
        let probe = PageProbe {
            buttons: vec![hidden],
            ..Default::default()
        };
        assert_eq!(CookieConsentStrategy::new().detect(&probe), None);
    }

    #[test]
    fn test_modal_close_button_or_escape() {
        let mut probe = PageProbe {
            dialogs: vec![ProbeElement::new("#promo", "Special offer")],
            buttons: vec![ProbeElement::new("#promo .x", "×").inside("#promo")],
            ..Default::default()
        };
        assert_eq!(
            ModalDialogStrategy.detect(&probe),
            Some(DismissAction::Click { selector: "#promo .x".into() })
        );

        probe.buttons.clear();
        assert_eq!(
            ModalDialogStrategy.detect(&probe),
            Some(DismissAction::PressKey { key: "Escape".into() })
        );

        probe.dialogs.clear();
        assert_eq!(ModalDialogStrategy.detect(&probe), None);
    }

    #[test]
    fn test_signup_overlay_hidden() {
        let probe = PageProbe {
            overlays: vec![
                ProbeElement::new("#hero", "Welcome"),
                ProbeElement::new(".nl", "Subscribe to our newsletter"),
            ],
            ..Default::default()
        };
        assert_eq!(
            SignupOverlayStrategy.detect(&probe),
            Some(DismissAction::Hide { selector: ".nl".into() })
        );
    }

    #[test]
    fn test_dismiss_action_serialization() {
        let v = serde_json::to_value(DismissAction::PressKey { key: "Escape".into() }).unwrap();
        assert_eq!(v, serde_json::json!({"type": "pressKey", "key": "Escape"}));
    }
}
