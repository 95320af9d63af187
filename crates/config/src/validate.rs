//! Configuration validation.
//!
//! Detects unknown/misspelled fields in TOML files and reports semantic
//! problems (zero timeouts, unusable sidecar URLs, exposed binds).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::schema::WabridgeConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "value", "security",
    /// "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "sessions.connect_wait_secs"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{} [{}]: {}", self.severity, self.path, self.message)
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Dynamic keys with scalar values (e.g. `sidecar.spawn.env`).
    Map,
    Leaf,
}

/// Mirrors every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    Struct(HashMap::from([
        ("data_dir", Leaf),
        (
            "server",
            Struct(HashMap::from([("bind", Leaf), ("port", Leaf)])),
        ),
        ("database", Struct(HashMap::from([("path", Leaf)]))),
        (
            "sessions",
            Struct(HashMap::from([
                ("connect_wait_secs", Leaf),
                ("stop_timeout_secs", Leaf),
                (
                    "reconnect",
                    Struct(HashMap::from([
                        ("max_attempts", Leaf),
                        ("initial_backoff_ms", Leaf),
                        ("max_backoff_ms", Leaf),
                    ])),
                ),
            ])),
        ),
        (
            "webhook",
            Struct(HashMap::from([
                ("timeout_secs", Leaf),
                ("max_attempts", Leaf),
                ("retry_backoff_ms", Leaf),
            ])),
        ),
        (
            "sidecar",
            Struct(HashMap::from([
                ("url", Leaf),
                ("request_timeout_secs", Leaf),
                ("auth_dir", Leaf),
                (
                    "spawn",
                    Struct(HashMap::from([
                        ("command", Leaf),
                        ("args", Leaf),
                        ("env", Map),
                        ("working_dir", Leaf),
                        ("stop_timeout_secs", Leaf),
                    ])),
                ),
            ])),
        ),
        ("metrics", Struct(HashMap::from([("enabled", Leaf)]))),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered one when
/// `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");

    let mut result = if is_toml {
        match std::fs::read_to_string(&actual_path) {
            Ok(content) => validate_toml_str(&crate::env_subst::substitute_env(&content)),
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "syntax",
                    "",
                    format!("failed to read config file: {e}"),
                )],
                config_path: None,
            },
        }
    } else {
        match crate::loader::load_config(&actual_path) {
            Ok(config) => ValidationResult {
                diagnostics: validate_config(&config),
                config_path: None,
            },
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "type-error",
                    "",
                    e.to_string(),
                )],
                config_path: None,
            },
        }
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate TOML text: syntax, unknown fields, types, then semantics.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&toml_value, &build_schema_map(), "", &mut diagnostics);

    match toml::from_str::<WabridgeConfig>(toml_str) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => {
                check_unknown_fields(child_value, child_schema, &path, diagnostics)
            },
            None => {
                let message = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    message,
                ));
            },
        }
    }
}

/// Semantic checks on an already-parsed config.
#[must_use]
pub fn validate_config(config: &WabridgeConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    if config.server.port == 0 {
        out.push(Diagnostic::new(
            Severity::Info,
            "value",
            "server.port",
            "port 0 binds a random free port",
        ));
    }
    if !is_loopback(&config.server.bind) {
        out.push(Diagnostic::new(
            Severity::Warning,
            "security",
            "server.bind",
            format!(
                "binding to {} exposes tenant tokens over plain HTTP; put a TLS proxy in front",
                config.server.bind
            ),
        ));
    }

    for (path, value) in [
        ("sessions.connect_wait_secs", config.sessions.connect_wait_secs),
        ("sessions.stop_timeout_secs", config.sessions.stop_timeout_secs),
        ("webhook.timeout_secs", config.webhook.timeout_secs),
        ("sidecar.request_timeout_secs", config.sidecar.request_timeout_secs),
    ] {
        if value == 0 {
            out.push(Diagnostic::new(
                Severity::Error,
                "value",
                path,
                "must be greater than zero",
            ));
        }
    }

    if config.webhook.max_attempts == 0 {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "webhook.max_attempts",
            "must be at least 1",
        ));
    }

    let reconnect = &config.sessions.reconnect;
    if reconnect.initial_backoff_ms > reconnect.max_backoff_ms {
        out.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "sessions.reconnect.initial_backoff_ms",
            "larger than max_backoff_ms; every retry waits max_backoff_ms",
        ));
    }

    match url::Url::parse(&config.sidecar.url) {
        Ok(u) if matches!(u.scheme(), "ws" | "wss") => {},
        Ok(u) => out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "sidecar.url",
            format!("unsupported scheme \"{}\", expected ws or wss", u.scheme()),
        )),
        Err(e) => out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "sidecar.url",
            format!("invalid URL: {e}"),
        )),
    }

    if let Some(spawn) = &config.sidecar.spawn
        && spawn.command.trim().is_empty()
    {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "sidecar.spawn.command",
            "must not be empty",
        ));
    }

    out
}

fn is_loopback(bind: &str) -> bool {
    match bind.parse::<std::net::IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        Err(_) => bind == "localhost",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(result: &'a ValidationResult, path: &str) -> Option<&'a Diagnostic> {
        result.diagnostics.iter().find(|d| d.path == path)
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("port", "port"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("prot", "port"), 2);
        assert_eq!(levenshtein("bnd", "bind"), 1);
    }

    #[test]
    fn empty_config_is_valid() {
        let result = validate_toml_str("");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unknown_nested_key_with_suggestion() {
        let result = validate_toml_str("[server]\nbnd = \"127.0.0.1\"\n");
        let d = find(&result, "server.bnd").unwrap();
        assert_eq!(d.category, "unknown-field");
        assert!(d.message.contains("\"bind\""));
    }

    #[test]
    fn unknown_top_level_section() {
        let result = validate_toml_str("[webhooks]\ntimeout_secs = 1\n");
        let d = find(&result, "webhooks").unwrap();
        assert!(d.message.contains("\"webhook\""));
    }

    #[test]
    fn spawn_env_accepts_any_key() {
        let result = validate_toml_str(
            "[sidecar.spawn]\ncommand = \"node\"\n[sidecar.spawn.env]\nANY_NAME = \"1\"\n",
        );
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn syntax_error_detected() {
        let result = validate_toml_str("[server\n");
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn type_error_detected() {
        let result = validate_toml_str("[server]\nport = \"eighty\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn zero_values_are_errors() {
        let result = validate_toml_str(
            "[sessions]\nconnect_wait_secs = 0\n[webhook]\nmax_attempts = 0\n",
        );
        assert!(find(&result, "sessions.connect_wait_secs").is_some());
        assert!(find(&result, "webhook.max_attempts").is_some());
        assert_eq!(result.count(Severity::Error), 2);
    }

    #[test]
    fn non_ws_sidecar_url_rejected() {
        let result = validate_toml_str("[sidecar]\nurl = \"http://127.0.0.1:7892\"\n");
        let d = find(&result, "sidecar.url").unwrap();
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn public_bind_warned() {
        let result = validate_toml_str("[server]\nbind = \"0.0.0.0\"\n");
        let d = find(&result, "server.bind").unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert!(!result.has_errors());
    }

    #[test]
    fn validates_yaml_files_semantically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wabridge.yaml");
        std::fs::write(&path, "webhook:\n  timeout_secs: 0\n").unwrap();
        let result = validate(Some(&path));
        assert!(find(&result, "webhook.timeout_secs").is_some());
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
    }
}
