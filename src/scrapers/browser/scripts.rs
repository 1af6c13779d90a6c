//! Page scripts used by the crawler: video interception hooks, player
//! triggering, scrolling and "load more" clicking.

/// Hooks XHR, fetch and DOM insertions and collects every video-looking URL
/// in `window.__interceptedVideoUrls__`. Installed on new documents so it
/// sees requests made during the initial load.
pub(crate) const VIDEO_INTERCEPT_SCRIPT: &str = r#"
(() => {
    if (window.__interceptedVideoUrls__) return;
    const found = [];
    window.__interceptedVideoUrls__ = found;
    const videoRe = /\.(m3u8|mp4|webm|mpd|m3u|mov)(\?|$)/i;
    const record = (url) => {
        try {
            if (typeof url !== 'string') url = String(url);
            if (url && videoRe.test(url.split('#')[0]) && !found.includes(url)) found.push(url);
        } catch (e) {}
    };

    const origOpen = XMLHttpRequest.prototype.open;
    XMLHttpRequest.prototype.open = function(method, url) {
        record(url);
        return origOpen.apply(this, arguments);
    };

    const origFetch = window.fetch;
    window.fetch = function(input, init) {
        record(typeof input === 'string' ? input : (input && input.url));
        return origFetch.apply(this, arguments);
    };

    const scan = (node) => {
        if (!node || node.nodeType !== 1) return;
        const els = node.matches && node.matches('video, source') ? [node] : [];
        if (node.querySelectorAll) els.push(...node.querySelectorAll('video, source'));
        for (const el of els) {
            record(el.src || el.getAttribute('src') || '');
            record(el.getAttribute('data-src') || '');
            if (el.currentSrc) record(el.currentSrc);
        }
    };
    const observer = new MutationObserver((mutations) => {
        for (const m of mutations) {
            if (m.type === 'attributes') scan(m.target);
            for (const n of m.addedNodes) scan(n);
        }
    });
    const start = () => {
        observer.observe(document.documentElement, {
            childList: true, subtree: true, attributes: true, attributeFilter: ['src', 'data-src']
        });
        scan(document.documentElement);
    };
    if (document.documentElement) start();
    else document.addEventListener('DOMContentLoaded', start);
})();
"#;

/// Returns intercepted URLs plus the current `<video>`/`<source>` sources.
pub(crate) const COLLECT_VIDEO_URLS_SCRIPT: &str = r#"
(() => {
    const urls = new Set(window.__interceptedVideoUrls__ || []);
    document.querySelectorAll('video, source').forEach((el) => {
        for (const v of [el.src, el.currentSrc, el.getAttribute('data-src')]) {
            if (v && /^https?:/i.test(v)) urls.add(v);
        }
    });
    return Array.from(urls);
})()
"#;

/// Hover previews and start muted playback so lazy players request media.
pub(crate) const TRIGGER_PLAYERS_SCRIPT: &str = r#"
(() => {
    const hover = document.querySelectorAll('[class*="clip"], [class*="video"], [class*="preview"], [class*="player"]');
    hover.forEach((el, i) => {
        if (i > 40) return;
        el.dispatchEvent(new MouseEvent('mouseover', { bubbles: true }));
        el.dispatchEvent(new MouseEvent('mouseenter', { bubbles: true }));
    });
    const videos = document.querySelectorAll('video');
    videos.forEach((v) => {
        try {
            v.muted = true;
            v.preload = 'auto';
            v.load();
            const p = v.play();
            if (p && p.catch) p.catch(() => {});
        } catch (e) {}
    });
    if (videos.length > 0) videos[0].scrollIntoView({ block: 'center' });
    return videos.length;
})()
"#;

/// Resolves once the document is interactive, or after 10 s.
pub(crate) const READY_STATE_SCRIPT: &str = r#"
new Promise((resolve) => {
    if (document.readyState === 'complete' || document.readyState === 'interactive') {
        resolve(document.readyState);
    } else {
        document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
        setTimeout(() => resolve('timeout'), 10000);
    }
})
"#;

pub(crate) const BODY_TEXT_SCRIPT: &str =
    "document.body ? document.body.innerText : ''";

/// Scroll to `fraction` of the document height.
pub(crate) fn scroll_to_fraction(fraction: f64) -> String {
    format!(
        "window.scrollTo(0, document.body.scrollHeight * {:.4})",
        fraction.clamp(0.0, 1.0)
    )
}

/// Click the first visible element matching `selector`; resolves to whether
/// a click happened.
pub(crate) fn click_visible(selector: &str) -> String {
    let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"
(() => {{
    let els;
    try {{ els = document.querySelectorAll({quoted}); }} catch (e) {{ return false; }}
    for (const el of els) {{
        const r = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        if (r.width === 0 || r.height === 0 || style.visibility === 'hidden' || style.display === 'none') continue;
        if (el.disabled) continue;
        el.scrollIntoView({{ block: 'center' }});
        el.click();
        return true;
    }}
    return false;
}})()
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_visible_quotes_selector() {
        let js = click_visible(r#"button[class*="loadMore"]"#);
        assert!(js.contains(r#"querySelectorAll("button[class*=\"loadMore\"]")"#));
    }

    #[test]
    fn test_scroll_fraction_is_clamped() {
        assert!(scroll_to_fraction(2.0).ends_with("* 1.0000)"));
        assert!(scroll_to_fraction(0.5).ends_with("* 0.5000)"));
    }
}
