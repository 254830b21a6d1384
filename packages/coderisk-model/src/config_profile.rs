use serde::{Deserialize, Serialize};

/// identity: config_key. §3 ConfigProfile. These are immutable built-ins;
/// there is no constructor that produces an arbitrary profile outside of
/// [`BUILTIN_PROFILES`] — the domain/config selector (§4.10) only ever
/// hands back one of these by key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigProfile {
    pub config_key: &'static str,
    pub coupling_threshold: i32,
    pub co_change_threshold: f64,
    pub test_ratio_threshold: f64,
    pub rationale: &'static str,
}

macro_rules! profile {
    ($key:expr, $coupling:expr, $co_change:expr, $test_ratio:expr, $rationale:expr) => {
        ConfigProfile {
            config_key: $key,
            coupling_threshold: $coupling,
            co_change_threshold: $co_change,
            test_ratio_threshold: $test_ratio,
            rationale: $rationale,
        }
    };
}

/// The built-in profile table of §4.10, values normative where shown.
pub const BUILTIN_PROFILES: &[ConfigProfile] = &[
    profile!("rust_backend", 7, 0.55, 0.55, "systems-language backends tend to have low fan-out and high test discipline"),
    profile!("go_backend", 8, 0.60, 0.50, "typical Go service module coupling"),
    profile!("go_web", 10, 0.65, 0.45, "Go web frameworks add handler fan-out"),
    profile!("python_backend", 12, 0.70, 0.50, "dynamic typing tolerates more coupling before it's risky"),
    profile!("java_backend", 12, 0.65, 0.60, "enterprise Java backends carry heavier test suites"),
    profile!("python_web", 15, 0.75, 0.40, "web frameworks fan out through routing/middleware layers"),
    profile!("typescript_web", 18, 0.80, 0.35, "server-side TypeScript web apps"),
    profile!("typescript_frontend", 20, 0.80, 0.30, "component trees have naturally high coupling"),
    profile!("ml_project", 10, 0.70, 0.25, "notebooks and scripts are lightly tested by convention"),
    profile!("cli_tool", 10, 0.60, 0.40, "CLIs are typically small and shallow"),
    profile!("default", 10, 0.70, 0.30, "fallback when no signal matches"),
];

pub fn by_key(key: &str) -> Option<&'static ConfigProfile> {
    BUILTIN_PROFILES.iter().find(|p| p.config_key == key)
}

pub fn default_profile() -> &'static ConfigProfile {
    by_key("default").expect("default profile always present")
}
