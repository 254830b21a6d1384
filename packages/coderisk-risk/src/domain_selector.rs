//! Domain/Config Selector (§4.10): maps a repository's shape onto one of
//! the built-in `ConfigProfile`s through an ordered cascade - infer a
//! domain from framework/directory signals, normalize the language,
//! look up an exact `{lang}_{domain}` key, fall back by language, fall
//! back by domain, and finally the global default. Every step records a
//! human-readable reason so the selection can be explained, not just
//! applied.

use coderisk_model::{by_key, default_profile, ConfigProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Backend,
    Web,
    Frontend,
    Ml,
    Cli,
}

impl Domain {
    fn as_key_segment(&self) -> &'static str {
        match self {
            Domain::Backend => "backend",
            Domain::Web => "web",
            Domain::Frontend => "frontend",
            Domain::Ml => "ml",
            Domain::Cli => "cli",
        }
    }
}

/// What the selector is given to work with (§4.10). The caller assembles
/// this from whatever repo introspection it already has; the selector
/// itself performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct RepoMetadata {
    pub primary_language: Option<String>,
    pub dependency_manifests: Vec<String>,
    pub directory_names: Vec<String>,
    pub sample_file_paths: Vec<String>,
    pub package_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub profile: &'static ConfigProfile,
    pub reason: String,
    /// Set when the chosen profile looks anomalous for the inferred
    /// domain (§4.10's validator), e.g. a frontend repo landing on a
    /// profile with an unusually low coupling threshold.
    pub warning: Option<String>,
}

const WEB_FRAMEWORK_MARKERS: &[&str] = &["flask", "django", "fastapi", "express", "next", "spring", "gin"];
const FRONTEND_FRAMEWORK_MARKERS: &[&str] = &["react", "vue", "angular", "svelte"];
const ML_FRAMEWORK_MARKERS: &[&str] = &["tensorflow", "torch", "pytorch", "pandas"];
const CLI_FRAMEWORK_MARKERS: &[&str] = &["cobra", "click", "commander"];

const BACKEND_DIRS: &[&str] = &["api", "server", "services", "handlers"];
const FRONTEND_DIRS: &[&str] = &["components", "pages", "public", "assets"];
const WEB_DIRS: &[&str] = &["templates", "views", "routes"];

fn manifest_signals(metadata: &RepoMetadata) -> Vec<String> {
    let mut haystack: Vec<String> = metadata.dependency_manifests.iter().map(|s| s.to_ascii_lowercase()).collect();
    if let Some(package_json) = &metadata.package_json {
        haystack.push(package_json.to_ascii_lowercase());
    }
    haystack
}

fn matches_any(haystack: &[String], markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.iter().any(|h| h.contains(marker)))
}

fn count_matching_dirs(directory_names: &[String], markers: &[&str]) -> usize {
    let lowered: Vec<String> = directory_names.iter().map(|d| d.to_ascii_lowercase()).collect();
    markers.iter().filter(|marker| lowered.iter().any(|d| d == *marker)).count()
}

/// §4.10 step 1: domain inference, framework signals first (the strongest
/// signal), then directory scoring, then a language-keyed default.
fn infer_domain(metadata: &RepoMetadata) -> (Domain, String) {
    let manifests = manifest_signals(metadata);

    if matches_any(&manifests, ML_FRAMEWORK_MARKERS) {
        return (Domain::Ml, "ML framework import detected in dependency manifests".to_string());
    }
    if matches_any(&manifests, FRONTEND_FRAMEWORK_MARKERS) {
        return (Domain::Frontend, "frontend framework import detected in dependency manifests".to_string());
    }
    if matches_any(&manifests, WEB_FRAMEWORK_MARKERS) {
        return (Domain::Web, "web framework import detected in dependency manifests".to_string());
    }
    if matches_any(&manifests, CLI_FRAMEWORK_MARKERS) {
        return (Domain::Cli, "CLI framework import detected in dependency manifests".to_string());
    }

    if count_matching_dirs(&metadata.directory_names, FRONTEND_DIRS) >= 2 {
        return (Domain::Frontend, "2+ frontend-shaped directories found (components/pages/public/assets)".to_string());
    }
    if count_matching_dirs(&metadata.directory_names, WEB_DIRS) >= 2 {
        return (Domain::Web, "2+ web-shaped directories found (templates/views/routes)".to_string());
    }
    if count_matching_dirs(&metadata.directory_names, BACKEND_DIRS) >= 2 {
        return (Domain::Backend, "2+ backend-shaped directories found (api/server/services/handlers)".to_string());
    }

    if let Some(language) = &metadata.primary_language {
        if BACKEND_DEFAULT_LANGUAGES.contains(&language.to_ascii_lowercase().as_str()) {
            return (Domain::Backend, format!("no framework or directory signal; {language} defaults to backend"));
        }
    }

    (Domain::Backend, "no framework, directory, or language signal; defaulting to backend".to_string())
}

/// §4.10 step 2: language normalization. JS/JSX collapses into the
/// TypeScript family since the built-in profiles don't distinguish them.
fn normalize_language(primary_language: &str) -> String {
    match primary_language.to_ascii_lowercase().as_str() {
        "javascript" | "jsx" => "typescript".to_string(),
        other => other.to_string(),
    }
}

/// §4.10 step 5: when no exact or language-fallback profile exists for
/// the inferred domain, each domain still has one named default profile.
fn domain_fallback_key(domain: Domain) -> &'static str {
    match domain {
        Domain::Web => "python_web",
        Domain::Backend => "go_backend",
        Domain::Frontend => "typescript_frontend",
        Domain::Ml => "ml_project",
        Domain::Cli => "cli_tool",
    }
}

/// Languages that default to a backend domain absent any other signal
/// (§4.10 step 1's language-default fallback).
const BACKEND_DEFAULT_LANGUAGES: &[&str] = &["go", "java", "rust", "c#", "kotlin", "scala", "elixir"];

fn language_fallback_order(language: &str) -> Vec<&'static str> {
    match language {
        "rust" => vec!["rust_backend"],
        "go" => vec!["go_backend", "go_web"],
        "python" => vec!["python_backend", "python_web"],
        "java" => vec!["java_backend"],
        "typescript" => vec!["typescript_web", "typescript_frontend"],
        _ => vec![],
    }
}

fn validate(domain: Domain, profile: &ConfigProfile) -> Option<String> {
    if domain == Domain::Frontend && profile.coupling_threshold < 15 {
        return Some(format!(
            "profile {} has an unusually low coupling threshold ({}) for an inferred frontend repository",
            profile.config_key, profile.coupling_threshold
        ));
    }
    None
}

/// The full §4.10 cascade. Always returns a profile - the final fallback
/// is the crate-wide `default_profile()`.
pub fn select_profile(metadata: &RepoMetadata) -> SelectionResult {
    let (domain, domain_reason) = infer_domain(metadata);

    let language = metadata.primary_language.as_deref().map(normalize_language);

    if let Some(language) = &language {
        let exact_key = format!("{language}_{}", domain.as_key_segment());
        if let Some(profile) = by_key(&exact_key) {
            let reason = format!("{domain_reason}; exact match on `{exact_key}`");
            return SelectionResult { warning: validate(domain, profile), profile, reason };
        }

        for key in language_fallback_order(language) {
            if let Some(profile) = by_key(key) {
                let reason = format!("{domain_reason}; no exact `{language}_{}` profile, falling back to `{key}` by language", domain.as_key_segment());
                return SelectionResult { warning: validate(domain, profile), profile, reason };
            }
        }
    }

    let fallback_key = domain_fallback_key(domain);
    if let Some(profile) = by_key(fallback_key) {
        let reason = format!("{domain_reason}; no language-specific profile, falling back to `{fallback_key}` by domain");
        return SelectionResult { warning: validate(domain, profile), profile, reason };
    }

    SelectionResult {
        profile: default_profile(),
        reason: format!("{domain_reason}; no domain or language profile matched, using the default profile"),
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_rust_backend_match() {
        let metadata = RepoMetadata { primary_language: Some("rust".to_string()), directory_names: vec!["services".into(), "api".into()], ..Default::default() };
        let result = select_profile(&metadata);
        assert_eq!(result.profile.config_key, "rust_backend");
    }

    #[test]
    fn react_dependency_infers_frontend_domain() {
        let metadata =
            RepoMetadata { primary_language: Some("typescript".to_string()), dependency_manifests: vec!["react".to_string()], ..Default::default() };
        let result = select_profile(&metadata);
        assert_eq!(result.profile.config_key, "typescript_frontend");
    }

    #[test]
    fn javascript_normalizes_to_typescript_family() {
        let metadata = RepoMetadata { primary_language: Some("javascript".to_string()), dependency_manifests: vec!["express".to_string()], ..Default::default() };
        let result = select_profile(&metadata);
        assert_eq!(result.profile.config_key, "typescript_web");
    }

    #[test]
    fn unknown_language_falls_back_to_domain_default() {
        let metadata = RepoMetadata { primary_language: Some("haskell".to_string()), dependency_manifests: vec!["flask".to_string()], ..Default::default() };
        let result = select_profile(&metadata);
        assert_eq!(result.profile.config_key, "python_web");
    }

    #[test]
    fn no_signal_at_all_falls_back_to_backend_domain_default() {
        let metadata = RepoMetadata { primary_language: Some("haskell".to_string()), ..Default::default() };
        let result = select_profile(&metadata);
        assert_eq!(result.profile.config_key, "go_backend");
    }

    #[test]
    fn frontend_with_low_coupling_threshold_warns() {
        let metadata = RepoMetadata { primary_language: Some("rust".to_string()), dependency_manifests: vec!["react".to_string()], ..Default::default() };
        let result = select_profile(&metadata);
        assert!(result.warning.is_some());
    }
}
