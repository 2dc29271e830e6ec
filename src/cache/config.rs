//! Cache configuration.
//!
//! Built from the `[cache]` section of `menu-cache.toml` (see `crate::config`), or
//! directly in code by embedding applications and tests.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_RESPONSE_TTL_SECS: u64 = 300;
const DEFAULT_QUERY_TTL_SECS: u64 = 600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Mutating requests whose path contains `pattern` invalidate `tables`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvalidationRule {
    pub pattern: String,
    pub tables: Vec<String>,
}

/// Responses cached for paths containing `pattern` are filed under `tags`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteTags {
    pub pattern: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve and store responses. Invalidation runs regardless.
    pub enabled: bool,
    pub response_ttl: Duration,
    pub query_ttl: Duration,
    pub sweep_interval: Duration,
    /// Responses whose body may exceed this are passed through uncached.
    pub max_body_bytes: usize,
    /// Checked in registration order.
    pub invalidation: Vec<InvalidationRule>,
    pub routes: Vec<RouteTags>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            response_ttl: Duration::from_secs(DEFAULT_RESPONSE_TTL_SECS),
            query_ttl: Duration::from_secs(DEFAULT_QUERY_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            invalidation: Vec::new(),
            routes: Vec::new(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            response_ttl: settings.response_ttl,
            query_ttl: settings.query_ttl,
            sweep_interval: settings.sweep_interval,
            max_body_bytes: settings.max_body_bytes.get(),
            invalidation: settings.invalidation.clone(),
            routes: settings.routes.clone(),
        }
    }
}

impl CacheConfig {
    /// Tables to invalidate after a mutation of `path`, deduplicated, in rule order.
    pub fn tables_for(&self, path: &str) -> Vec<&str> {
        collect_matching(
            self.invalidation
                .iter()
                .map(|rule| (rule.pattern.as_str(), rule.tables.as_slice())),
            path,
        )
    }

    /// Tags for a response cached under `path`. Empty when no route matches.
    pub fn tags_for(&self, path: &str) -> Vec<&str> {
        collect_matching(
            self.routes
                .iter()
                .map(|route| (route.pattern.as_str(), route.tags.as_slice())),
            path,
        )
    }
}

fn collect_matching<'a, I>(rules: I, path: &str) -> Vec<&'a str>
where
    I: Iterator<Item = (&'a str, &'a [String])>,
{
    let mut names: Vec<&str> = Vec::new();
    for (pattern, values) in rules {
        if !path.contains(pattern) {
            continue;
        }
        for value in values {
            if !names.contains(&value.as_str()) {
                names.push(value.as_str());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CacheConfig {
        CacheConfig {
            invalidation: vec![
                InvalidationRule {
                    pattern: "/api/menus".to_string(),
                    tables: vec!["menus".to_string(), "items".to_string()],
                },
                InvalidationRule {
                    pattern: "/items".to_string(),
                    tables: vec!["items".to_string()],
                },
            ],
            routes: vec![RouteTags {
                pattern: "/api/menus".to_string(),
                tags: vec!["menus".to_string()],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.response_ttl, Duration::from_secs(300));
        assert_eq!(config.query_ttl, Duration::from_secs(600));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn tables_match_by_substring_and_deduplicate() {
        let config = config();
        assert_eq!(
            config.tables_for("/api/menus/7/items"),
            vec!["menus", "items"]
        );
        assert_eq!(config.tables_for("/api/orders/7/items"), vec!["items"]);
        assert!(config.tables_for("/api/orders").is_empty());
    }

    #[test]
    fn unregistered_routes_have_no_tags() {
        let config = config();
        assert_eq!(config.tags_for("/api/menus?page=1"), vec!["menus"]);
        assert!(config.tags_for("/healthz").is_empty());
    }
}
