/// Case-insensitive regex-set log line filtering, with a small built-in set
/// of common noise patterns (health-check polling, framework heartbeats)
/// that manifests can extend or turn off.

use regex::RegexSet;

const BUILTIN_PATTERNS: &[&str] = &[
    r"GET /healthz",
    r"GET /health\b",
    r"^\s*$",
    r"webpack compiled successfully",
    r"\[HMR\]",
];

pub struct LogFilter {
    set: RegexSet,
}

impl LogFilter {
    /// `exclude` are additional regex patterns (case-insensitive). When
    /// `include_builtins` is true the built-in noise patterns are merged in.
    pub fn new(exclude: Vec<String>, include_builtins: bool) -> Self {
        let mut patterns: Vec<String> = Vec::new();
        if include_builtins {
            patterns.extend(BUILTIN_PATTERNS.iter().map(|s| s.to_string()));
        }
        patterns.extend(exclude);

        let case_insensitive: Vec<String> = patterns.iter().map(|p| format!("(?i){}", p)).collect();
        let set = RegexSet::new(&case_insensitive)
            .unwrap_or_else(|_| RegexSet::new(Vec::<String>::new()).expect("empty pattern set always compiles"));
        Self { set }
    }

    pub fn from_manifest_config(config: &crate::manifest::FiltersConfig) -> Self {
        Self::new(config.exclude.clone(), config.include_builtins)
    }

    pub fn excludes(&self, line: &str) -> bool {
        self.set.is_match(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_patterns_exclude_health_polling() {
        let filter = LogFilter::new(vec![], true);
        assert!(filter.excludes("GET /healthz 200 OK"));
        assert!(!filter.excludes("request to /api/users"));
    }

    #[test]
    fn custom_patterns_extend_builtins() {
        let filter = LogFilter::new(vec!["^debug:".to_string()], true);
        assert!(filter.excludes("debug: verbose trace"));
        assert!(filter.excludes("GET /healthz"));
    }

    #[test]
    fn builtins_can_be_disabled() {
        let filter = LogFilter::new(vec!["^debug:".to_string()], false);
        assert!(!filter.excludes("GET /healthz"));
        assert!(filter.excludes("debug: verbose trace"));
    }
}
