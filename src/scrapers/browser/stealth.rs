//! Fingerprint evasion installed before any page script runs.
//!
//! Stock-video sites sit behind bot mitigation that looks for automation
//! flags and for a navigator that disagrees with the user agent. Headless
//! builds also give themselves away through a media stack that cannot play
//! H.264. The script is assembled per
//! session from [`BrowserSettings`] so the navigator matches the configured
//! user agent. Visible windows only get the first two.

use super::config::BrowserSettings;

/// Hides `navigator.webdriver` on the prototype, where detectors look.
const WEBDRIVER: &str = r#"
(() => {
    const proto = Object.getPrototypeOf(navigator);
    if ('webdriver' in proto) {
        Object.defineProperty(proto, 'webdriver', { get: () => false, configurable: true });
    }
})();
"#;

/// Headless Chromium ships without `window.chrome.runtime`.
const CHROME_RUNTIME: &str = r#"
(() => {
    if (window.chrome && window.chrome.runtime) return;
    window.chrome = Object.assign(window.chrome || {}, {
        runtime: { id: undefined, connect: () => {}, sendMessage: () => {} },
        loadTimes: () => ({}),
        csi: () => ({}),
    });
})();
"#;

/// Headless reports `denied` for notifications while `Notification.permission`
/// says `default`; challenge scripts compare the two.
const PERMISSIONS: &str = r#"
(() => {
    const permissions = navigator.permissions;
    if (!permissions || !permissions.query) return;
    const query = permissions.query.bind(permissions);
    permissions.query = (desc) =>
        desc && desc.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission, onchange: null })
            : query(desc);
})();
"#;

/// Chromium builds without proprietary codecs answer `""` for H.264/AAC,
/// which players (and the challenge pages in front of them) treat as a bot.
const MEDIA_CODECS: &str = r#"
(() => {
    const wanted = /^(video|audio)\/mp4|avc1|mp4a|hvc1|^audio\/mpeg/i;
    const canPlay = HTMLMediaElement.prototype.canPlayType;
    HTMLMediaElement.prototype.canPlayType = function(type) {
        const answer = canPlay.call(this, type);
        return answer === '' && wanted.test(type || '') ? 'probably' : answer;
    };
    if (window.MediaSource && MediaSource.isTypeSupported) {
        const supported = MediaSource.isTypeSupported.bind(MediaSource);
        MediaSource.isTypeSupported = (type) => supported(type) || wanted.test(type || '');
    }
})();
"#;

/// SwiftShader gives headless away through the unmasked WebGL renderer.
const WEBGL: &str = r#"
(() => {
    const patch = (ctx) => {
        if (!ctx) return;
        const getParameter = ctx.prototype.getParameter;
        ctx.prototype.getParameter = function(p) {
            if (p === 37445) return 'Google Inc. (Intel)';
            if (p === 37446) return 'ANGLE (Intel, Intel(R) UHD Graphics 630, OpenGL 4.1)';
            return getParameter.call(this, p);
        };
    };
    patch(window.WebGLRenderingContext);
    patch(window.WebGL2RenderingContext);
})();
"#;

/// `navigator.platform` value consistent with a user agent string.
fn platform_for(user_agent: &str) -> &'static str {
    if user_agent.contains("Windows") {
        "Win32"
    } else if user_agent.contains("Macintosh") || user_agent.contains("Mac OS X") {
        "MacIntel"
    } else {
        "Linux x86_64"
    }
}

fn navigator_script(settings: &BrowserSettings) -> String {
    let languages = serde_json::to_string(&settings.languages).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"
(() => {{
    const proto = Object.getPrototypeOf(navigator);
    Object.defineProperty(proto, 'platform', {{ get: () => '{platform}', configurable: true }});
    const languages = {languages};
    if (languages.length) {{
        Object.defineProperty(proto, 'languages', {{ get: () => languages.slice(), configurable: true }});
        Object.defineProperty(proto, 'language', {{ get: () => languages[0], configurable: true }});
    }}
}})();
"#,
        platform = platform_for(&settings.user_agent),
        languages = languages,
    )
}

/// The evasion script for one session, or `None` when stealth is off.
pub(crate) fn stealth_script(settings: &BrowserSettings, headless: bool) -> Option<String> {
    if !settings.stealth {
        return None;
    }
    let mut parts = vec![WEBDRIVER.to_string(), navigator_script(settings)];
    if headless {
        parts.extend([CHROME_RUNTIME, PERMISSIONS, MEDIA_CODECS, WEBGL].map(str::to_string));
    }
    Some(parts.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_follows_user_agent() {
        assert_eq!(platform_for(&BrowserSettings::default().user_agent), "Win32");
        assert_eq!(
            platform_for("Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/537.36"),
            "MacIntel"
        );
        assert_eq!(platform_for("Mozilla/5.0 (X11; Linux x86_64)"), "Linux x86_64");
    }

    #[test]
    fn test_headless_gets_media_and_webgl_patches() {
        let settings = BrowserSettings::default();
        let headless = stealth_script(&settings, true).unwrap();
        assert!(headless.contains("canPlayType"));
        assert!(headless.contains("WebGL2RenderingContext"));
        assert!(headless.contains("'Win32'"));
        assert!(headless.contains(r#"["en-US","en"]"#));

        let visible = stealth_script(&settings, false).unwrap();
        assert!(visible.contains("webdriver"));
        assert!(!visible.contains("canPlayType"));
        assert!(!visible.contains("chrome.runtime"));
    }

    #[test]
    fn test_disabled_stealth_installs_nothing() {
        let settings = BrowserSettings {
            stealth: false,
            ..BrowserSettings::default()
        };
        assert!(stealth_script(&settings, true).is_none());
    }
}
