//! Browser launch configuration.

use serde::{Deserialize, Serialize};

/// How the crawler's browser is launched or attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Run in headless mode (default: true).
    /// A detected challenge switches the session to a visible window.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Explicit Chrome/Chromium executable; searched for when unset.
    #[serde(default)]
    pub chrome_path: Option<String>,

    /// User agent sent by every page.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Apply the stealth evasion scripts (default: true).
    #[serde(default = "default_stealth")]
    pub stealth: bool,

    /// `navigator.languages` reported under stealth.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            proxy: None,
            chrome_path: None,
            user_agent: default_user_agent(),
            stealth: default_stealth(),
            languages: default_languages(),
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

pub fn default_headless() -> bool {
    true
}

pub fn default_stealth() -> bool {
    true
}

pub fn default_languages() -> Vec<String> {
    vec!["en-US".to_string(), "en".to_string()]
}

pub fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string()
}
