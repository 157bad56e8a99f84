//! Config validation: unknown-key detection with Levenshtein suggestions
//! and value range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Unknown keys never break a config.

use std::collections::HashSet;

use super::{StoreBackend, TrafficConfig};

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `TrafficConfig`.
///
/// Any new field added to `TrafficConfig` must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [store]
        "store",
        "store.backend",
        "store.path",
        "store.interval_ms",
        // [congestion]
        "congestion",
        "congestion.threshold",
        "congestion.lookback_multiplier",
        "congestion.accident_rule",
        // [ingest]
        "ingest",
        "ingest.sink_workers",
        "ingest.channel_capacity",
        "ingest.max_store_retries",
        "ingest.retry_base_delay_ms",
        "ingest.skip_non_positive",
        // [server]
        "server",
        "server.addr",
        "server.query_timeout_ms",
        "server.cors_origins",
    ];
    keys.iter().copied().collect()
}

/// Recursively collect dotted key paths from a TOML value.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

/// Validate value ranges on a parsed `TrafficConfig`.
///
/// Returns (errors, warnings). Errors are values the store or classifier
/// cannot work with and must prevent startup; warnings are legal but unusual.
pub fn validate_ranges(config: &TrafficConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let store = &config.store;
    if store.interval_ms <= 0 {
        errors.push(format!(
            "store.interval_ms = {} must be > 0",
            store.interval_ms
        ));
    } else if store.interval_ms < 1_000 {
        warnings.push(ValidationWarning {
            field: "store.interval_ms".to_string(),
            message: format!(
                "store.interval_ms = {} is below one second, records carry whole seconds",
                store.interval_ms
            ),
            suggestion: None,
        });
    }
    if store.backend == StoreBackend::Sled && store.path.as_os_str().is_empty() {
        errors.push("store.path must not be empty for the sled backend".to_string());
    }

    let congestion = &config.congestion;
    if congestion.threshold <= 0 {
        errors.push(format!(
            "congestion.threshold = {} must be > 0",
            congestion.threshold
        ));
    }
    if congestion.lookback_multiplier <= 0 {
        errors.push(format!(
            "congestion.lookback_multiplier = {} must be > 0",
            congestion.lookback_multiplier
        ));
    }

    let ingest = &config.ingest;
    if ingest.sink_workers == 0 {
        errors.push("ingest.sink_workers must be > 0".to_string());
    }
    if ingest.channel_capacity == 0 {
        errors.push("ingest.channel_capacity must be > 0".to_string());
    } else if ingest.channel_capacity < ingest.sink_workers {
        warnings.push(ValidationWarning {
            field: "ingest.channel_capacity".to_string(),
            message: format!(
                "ingest.channel_capacity = {} is smaller than sink_workers = {}",
                ingest.channel_capacity, ingest.sink_workers
            ),
            suggestion: None,
        });
    }

    let server = &config.server;
    if server.query_timeout_ms == 0 {
        errors.push("server.query_timeout_ms must be > 0".to_string());
    }
    if let Err(e) = server.socket_addr() {
        errors.push(e.to_string());
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("interval_ms", "interval_ms"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("treshold", "threshold"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [store]
            interval_ms = 1000
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"store".to_string()));
        assert!(keys.contains(&"store.interval_ms".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys("[congestion]\ntreshold = 50\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "congestion.treshold");
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("congestion.threshold")
        );
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[store]
backend = "memory"
interval_ms = 60000

[congestion]
threshold = 80
accident_rule = "window_sum"

[ingest]
sink_workers = 2

[server]
addr = "127.0.0.1:9000"
cors_origins = ["http://localhost:3000"]
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_unknown_section_produces_warning() {
        let warnings = validate_unknown_keys("[retention]\ndays = 30\n");
        assert!(warnings.iter().any(|w| w.field == "retention"));
        assert!(warnings.iter().any(|w| w.field == "retention.days"));
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_range_defaults_clean() {
        let (errors, warnings) = validate_ranges(&TrafficConfig::default());
        assert!(errors.is_empty(), "Defaults should produce no errors: {errors:?}");
        assert!(warnings.is_empty(), "Defaults should produce no warnings: {warnings:?}");
    }

    #[test]
    fn test_range_rejects_non_positive_core_values() {
        let mut config = TrafficConfig::default();
        config.store.interval_ms = -1;
        config.congestion.threshold = 0;
        config.congestion.lookback_multiplier = 0;
        config.ingest.sink_workers = 0;
        config.server.query_timeout_ms = 0;
        let (errors, _) = validate_ranges(&config);
        for field in [
            "store.interval_ms",
            "congestion.threshold",
            "congestion.lookback_multiplier",
            "ingest.sink_workers",
            "server.query_timeout_ms",
        ] {
            assert!(
                errors.iter().any(|e| e.contains(field)),
                "{field} should be an error: {errors:?}"
            );
        }
    }

    #[test]
    fn test_range_sub_second_interval_warns() {
        let mut config = TrafficConfig::default();
        config.store.interval_ms = 250;
        let (errors, warnings) = validate_ranges(&config);
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.field == "store.interval_ms"));
    }

    #[test]
    fn test_range_bad_addr() {
        let mut config = TrafficConfig::default();
        config.server.addr = "localhost".to_string();
        let (errors, _) = validate_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("server.addr")));
    }
}
