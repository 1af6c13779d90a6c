//! Output paths from filename templates.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::types::DownloadError;
use crate::models::Clip;

/// Template used when the configured one has unknown tokens.
pub const FALLBACK_TEMPLATE: &str = "{title}_{clip_id}";

const TOKENS: &[&str] = &["title", "clip_id", "creator", "collection", "resolution"];

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Remove characters that are illegal in file names.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control())
        .collect();
    let cleaned = WHITESPACE.replace_all(cleaned.trim(), "_");
    cleaned.trim_end_matches(['_', '.']).to_string()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn has_unknown_tokens(template: &str) -> bool {
    TOKEN
        .captures_iter(template)
        .any(|c| !TOKENS.contains(&c[1].trim()))
}

fn token_value(clip: &Clip, token: &str) -> String {
    let id = &clip.key.clip_id;
    match token {
        "title" => {
            let title = truncate(&sanitize_component(&clip.title), 60);
            let title = title.trim_end_matches(['_', '.']).to_string();
            if title.is_empty() {
                format!("clip_{}", id)
            } else {
                title
            }
        }
        "clip_id" => sanitize_component(id),
        "creator" => non_empty(truncate(&sanitize_component(&clip.creator), 40)),
        "collection" => non_empty(truncate(&sanitize_component(&clip.collection), 40)),
        "resolution" => sanitize_component(&clip.resolution),
        _ => String::new(),
    }
}

fn non_empty(s: String) -> String {
    if s.is_empty() {
        "unknown".to_string()
    } else {
        s
    }
}

/// Render `template` for `clip` into a path relative to the output
/// directory, without extension. `/` in the template creates
/// subdirectories; the clip id is appended when the template omits it.
pub fn render(template: &str, clip: &Clip) -> Result<PathBuf, DownloadError> {
    let template = template.trim();
    let template = if template.is_empty() || has_unknown_tokens(template) {
        FALLBACK_TEMPLATE
    } else {
        template
    };

    let rendered = TOKEN.replace_all(template, |c: &regex::Captures| token_value(clip, c[1].trim()));
    let id = sanitize_component(&clip.key.clip_id);
    let rendered = if !id.is_empty() && !rendered.contains(&id) {
        format!("{}_{}", rendered, id)
    } else {
        rendered.into_owned()
    };

    let mut path = PathBuf::new();
    for part in rendered.split(['/', '\\']) {
        if part.trim() == ".." {
            return Err(DownloadError::fatal(
                clip.key.to_string(),
                format!("template {:?} escapes the output directory", template),
            ));
        }
        if part.trim().is_empty() || part.trim() == "." {
            continue;
        }
        let clean = sanitize_component(part);
        path.push(if clean.is_empty() { "clip".to_string() } else { clean });
    }
    if path.as_os_str().is_empty() {
        path.push(format!("clip_{}", id));
    }
    Ok(path)
}

/// Full target path under `output_dir` with extension `ext`.
pub fn target_path(output_dir: &Path, template: &str, clip: &Clip, ext: &str) -> Result<PathBuf, DownloadError> {
    let relative = render(template, clip)?;
    let mut file = relative.into_os_string();
    file.push(".");
    file.push(ext);
    let relative = PathBuf::from(file);

    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(DownloadError::fatal(
            clip.key.to_string(),
            format!("invalid output path {}", relative.display()),
        ));
    }
    Ok(output_dir.join(relative))
}

/// Sibling of `path` with a different extension, e.g. the sidecar.
pub fn sibling(path: &Path, ext: &str) -> PathBuf {
    path.with_extension(ext)
}

/// In-progress file for `path`.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClipKey, DownloadStatus, QualityTier};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn clip(title: &str, creator: &str) -> Clip {
        Clip {
            id: 1,
            key: ClipKey::new("Pexels", "1234"),
            source_url: String::new(),
            title: title.to_string(),
            creator: creator.to_string(),
            collection: String::new(),
            tags: Vec::new(),
            resolution: "3840x2160".to_string(),
            duration: String::new(),
            frame_rate: String::new(),
            camera: String::new(),
            thumbnail_url: String::new(),
            video_url: "https://cdn.example.com/1234.mp4".to_string(),
            quality_tier: QualityTier::Uhd,
            format: None,
            available_formats: BTreeSet::new(),
            found_at: Utc::now(),
            updated_at: Utc::now(),
            rating: 0,
            favorite: false,
            notes: String::new(),
            user_tags: Vec::new(),
            dl_status: DownloadStatus::None,
            local_path: None,
            thumb_path: None,
            dl_error: None,
            downloaded_at: None,
        }
    }

    #[test]
    fn test_title_template_appends_id_and_sanitizes() {
        let c = clip("Waves: at *dawn*?", "");
        assert_eq!(render("{title}", &c).unwrap(), PathBuf::from("Waves_at_dawn_1234"));
    }

    #[test]
    fn test_subdirectories_and_unknown_creator() {
        let c = clip("Forest", "");
        assert_eq!(
            render("{creator}/{resolution}/{title}_{clip_id}", &c).unwrap(),
            PathBuf::from("unknown/3840x2160/Forest_1234")
        );
    }

    #[test]
    fn test_unknown_token_falls_back() {
        let c = clip("City Lights", "Ana");
        assert_eq!(render("{bogus}-{title}", &c).unwrap(), PathBuf::from("City_Lights_1234"));
    }

    #[test]
    fn test_empty_title_uses_clip_prefix() {
        let c = clip("  ", "");
        assert_eq!(render("{title}", &c).unwrap(), PathBuf::from("clip_1234"));
    }

    #[test]
    fn test_escape_is_fatal() {
        let c = clip("x", "");
        let err = render("../{title}", &c).unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(err, DownloadError::Fatal { .. }));
    }

    #[test]
    fn test_absolute_template_stays_inside() {
        let c = clip("Sky", "");
        let path = target_path(Path::new("/out"), "/{title}", &c, "mp4").unwrap();
        assert_eq!(path, PathBuf::from("/out/Sky_1234.mp4"));
        assert_eq!(partial_path(&path), PathBuf::from("/out/Sky_1234.mp4.part"));
        assert_eq!(sibling(&path, "json"), PathBuf::from("/out/Sky_1234.json"));
    }
}
