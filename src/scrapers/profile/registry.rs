//! Registry of compiled site profiles.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{builtin_profiles, CompiledProfile, ProfileError, SiteProfile};

/// Profiles looked up by id (case-insensitive). Registering a new site is a
/// matter of adding a profile, either in code or as a file.
#[derive(Debug, Default, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Arc<CompiledProfile>>,
    order: Vec<String>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in profile.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for def in builtin_profiles() {
            let id = def.id.clone();
            if let Err(e) = registry.register(def) {
                warn!("Skipping built-in profile {}: {}", id, e);
            }
        }
        registry
    }

    /// Validate and add a profile. Ids must be unique.
    pub fn register(&mut self, def: SiteProfile) -> Result<Arc<CompiledProfile>, ProfileError> {
        let key = def.id.trim().to_ascii_lowercase();
        if self.profiles.contains_key(&key) {
            return Err(ProfileError::Duplicate(def.id));
        }
        let compiled = Arc::new(def.compile()?);
        debug!("Registered profile {}", compiled.id);
        self.profiles.insert(key.clone(), compiled.clone());
        self.order.push(key);
        Ok(compiled)
    }

    pub fn get(&self, id: &str) -> Option<Arc<CompiledProfile>> {
        self.profiles.get(&id.trim().to_ascii_lowercase()).cloned()
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|k| self.profiles.get(k))
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledProfile>> {
        self.order.iter().filter_map(|k| self.profiles.get(k))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Register every `*.toml`, `*.json`, `*.yaml` profile in `dir`.
    ///
    /// A missing directory is not an error. Returns the number of profiles
    /// added; the first invalid file aborts the load.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ProfileError> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let entries = std::fs::read_dir(dir).map_err(|source| ProfileError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("toml" | "json" | "yaml" | "yml")
                )
            })
            .collect();
        paths.sort();

        let mut added = 0;
        for path in paths {
            let def = load_profile_file(&path)?;
            self.register(def)?;
            added += 1;
        }
        if added > 0 {
            info!("Loaded {} profile(s) from {}", added, dir.display());
        }
        Ok(added)
    }
}

/// Parse one profile file by extension.
pub fn load_profile_file(path: &Path) -> Result<SiteProfile, ProfileError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: display.clone(),
        source,
    })?;
    let parse_err = |reason: String| ProfileError::Parse {
        path: display.clone(),
        reason,
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string())),
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string())),
        Some("yaml" | "yml") => {
            serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))
        }
        _ => Err(parse_err("unsupported profile format".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtins_registered_in_order() {
        let registry = ProfileRegistry::with_builtins();
        assert_eq!(
            registry.ids(),
            vec!["artlist", "pexels", "pixabay", "storyblocks", "generic"]
        );
        assert!(registry.get("Pexels").is_some());
        assert_eq!(registry.get("pexels").unwrap().name, "Pexels");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut registry = ProfileRegistry::with_builtins();
        let err = registry.register(SiteProfile::new("PEXELS", "Dup")).unwrap_err();
        assert!(matches!(err, ProfileError::Duplicate(_)));
    }

    #[test]
    fn test_load_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("vimeo.json"),
            r#"{"id": "vimeo", "domains": ["vimeo.com"], "start_url": "https://vimeo.com/"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut registry = ProfileRegistry::new();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 1);
        assert_eq!(registry.ids(), vec!["vimeo"]);
        assert_eq!(registry.load_dir(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_load_dir_reports_bad_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "id = ").unwrap();
        let mut registry = ProfileRegistry::new();
        assert!(matches!(
            registry.load_dir(dir.path()),
            Err(ProfileError::Parse { .. })
        ));
    }
}
