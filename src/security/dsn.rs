//! DSN Builder & Security Validator
//!
//! Turns a base connection string plus an options map into a backend-ready
//! connection string. Dangerous content in the base string is rejected;
//! dangerous options are dropped so one poisoned option cannot abort an
//! otherwise valid connection attempt.

use crate::database::connection::DatabaseBackend;
use crate::error::{DatabaseError, Result};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Category of a deny-list hit. Errors name the category, never the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatCategory {
    /// SQL DDL/DML keywords
    SqlKeyword,
    /// SQL comment markers
    CommentMarker,
    /// HTML/JS script content
    ScriptTag,
    /// Shell or command execution markers
    ShellMarker,
    /// NUL and line breaks
    ControlCharacter,
}

impl ThreatCategory {
    /// Human readable description used in error messages
    pub fn description(&self) -> &'static str {
        match self {
            ThreatCategory::SqlKeyword => "a forbidden SQL statement keyword",
            ThreatCategory::CommentMarker => "a SQL comment marker",
            ThreatCategory::ScriptTag => "script content",
            ThreatCategory::ShellMarker => "a shell command marker",
            ThreatCategory::ControlCharacter => "a control character",
        }
    }
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Lowercase patterns, matched against whitespace-normalized input
const DENY_LIST: &[(&str, ThreatCategory)] = &[
    ("drop table", ThreatCategory::SqlKeyword),
    ("drop database", ThreatCategory::SqlKeyword),
    ("drop schema", ThreatCategory::SqlKeyword),
    ("truncate table", ThreatCategory::SqlKeyword),
    ("delete from", ThreatCategory::SqlKeyword),
    ("insert into", ThreatCategory::SqlKeyword),
    ("alter table", ThreatCategory::SqlKeyword),
    ("create table", ThreatCategory::SqlKeyword),
    ("union select", ThreatCategory::SqlKeyword),
    ("grant all", ThreatCategory::SqlKeyword),
    (";exec", ThreatCategory::SqlKeyword),
    ("; exec", ThreatCategory::SqlKeyword),
    ("exec(", ThreatCategory::SqlKeyword),
    ("xp_cmdshell", ThreatCategory::SqlKeyword),
    ("--", ThreatCategory::CommentMarker),
    ("/*", ThreatCategory::CommentMarker),
    ("*/", ThreatCategory::CommentMarker),
    ("<script", ThreatCategory::ScriptTag),
    ("</script", ThreatCategory::ScriptTag),
    ("javascript:", ThreatCategory::ScriptTag),
    ("onerror=", ThreatCategory::ScriptTag),
    ("onload=", ThreatCategory::ScriptTag),
    ("$(", ThreatCategory::ShellMarker),
    ("`", ThreatCategory::ShellMarker),
    ("&&", ThreatCategory::ShellMarker),
    ("||", ThreatCategory::ShellMarker),
];

/// Scan `input` case-insensitively for deny-listed content.
pub fn scan(input: &str) -> Option<ThreatCategory> {
    if input.chars().any(|c| c == '\0' || c == '\n' || c == '\r') {
        return Some(ThreatCategory::ControlCharacter);
    }
    let normalized = input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    DENY_LIST
        .iter()
        .find(|(pattern, _)| normalized.contains(pattern))
        .map(|(_, category)| *category)
}

/// How parameters are attached to a connection string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `base?k=v&k2=v2`
    Query,
    /// `host=h dbname=d k=v` (PostgreSQL key/value form)
    KeyValue,
}

impl ParamStyle {
    /// Detect the style of a base string for a backend.
    pub fn detect(backend: DatabaseBackend, base: &str) -> Self {
        match backend {
            DatabaseBackend::PostgreSQL if !base.contains("://") => ParamStyle::KeyValue,
            _ => ParamStyle::Query,
        }
    }
}

/// Backend-specific validation and default rules
#[derive(Debug)]
pub struct DialectRules {
    /// Parameter carrying the TLS mode, if the backend has one
    pub tls_key: Option<&'static str>,
    /// Accepted TLS mode values
    pub tls_modes: &'static [&'static str],
    /// TLS modes that verify certificates
    pub verifying_modes: &'static [&'static str],
    /// Parameters that reference certificate files
    pub certificate_keys: &'static [&'static str],
    /// Defaults appended when neither base nor options supply them
    pub defaults: &'static [(&'static str, &'static str)],
}

static MYSQL_RULES: DialectRules = DialectRules {
    tls_key: Some("tls"),
    tls_modes: &[
        "false",
        "disabled",
        "preferred",
        "true",
        "required",
        "skip-verify",
        "verify-ca",
        "verify-identity",
    ],
    verifying_modes: &["verify-ca", "verify-identity"],
    certificate_keys: &["ssl-ca", "ssl-cert", "ssl-key"],
    defaults: &[
        ("tls", "preferred"),
        ("timeout", "10s"),
        ("readTimeout", "30s"),
        ("writeTimeout", "30s"),
        ("charset", "utf8mb4"),
        ("parseTime", "true"),
    ],
};

static POSTGRES_RULES: DialectRules = DialectRules {
    tls_key: Some("sslmode"),
    tls_modes: &["disable", "allow", "prefer", "require", "verify-ca", "verify-full"],
    verifying_modes: &["verify-ca", "verify-full"],
    certificate_keys: &["sslrootcert", "sslcert", "sslkey"],
    defaults: &[
        ("sslmode", "prefer"),
        ("connect_timeout", "10"),
        ("client_encoding", "UTF8"),
    ],
};

static SQLITE_RULES: DialectRules = DialectRules {
    tls_key: None,
    tls_modes: &[],
    verifying_modes: &[],
    certificate_keys: &[],
    defaults: &[
        ("_journal_mode", "WAL"),
        ("_busy_timeout", "5000"),
        ("_foreign_keys", "on"),
        ("_synchronous", "NORMAL"),
    ],
};

impl DialectRules {
    /// Rules for a backend
    pub fn for_backend(backend: DatabaseBackend) -> &'static DialectRules {
        match backend {
            DatabaseBackend::MySQL => &MYSQL_RULES,
            DatabaseBackend::PostgreSQL => &POSTGRES_RULES,
            DatabaseBackend::SQLite => &SQLITE_RULES,
        }
    }

    fn default_for(&self, key: &str) -> Option<&'static str> {
        self.defaults
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }
}

static EMPTY_OPTIONS: BTreeMap<String, String> = BTreeMap::new();

/// Builder for backend-ready connection strings
///
/// # Example
/// ```
/// use dbvault::database::DatabaseBackend;
/// use dbvault::security::dsn::DsnBuilder;
///
/// let dsn = DsnBuilder::new(DatabaseBackend::MySQL, "app:pw@tcp(localhost:3306)/shop")
///     .build()
///     .unwrap();
/// assert!(dsn.contains("charset=utf8mb4"));
/// ```
#[derive(Debug, Clone)]
pub struct DsnBuilder<'a> {
    backend: DatabaseBackend,
    base: &'a str,
    options: &'a BTreeMap<String, String>,
    strict: bool,
}

impl<'a> DsnBuilder<'a> {
    /// Create a builder for a base connection string
    pub fn new(backend: DatabaseBackend, base: &'a str) -> Self {
        Self {
            backend,
            base,
            options: &EMPTY_OPTIONS,
            strict: false,
        }
    }

    /// Attach caller-supplied options
    pub fn options(mut self, options: &'a BTreeMap<String, String>) -> Self {
        self.options = options;
        self
    }

    /// Enable the allow-list character check on top of the deny-list
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Validate and assemble the connection string
    pub fn build(&self) -> Result<String> {
        let base = self.base.trim();
        if base.is_empty() {
            return Err(DatabaseError::config("connection string must not be empty"));
        }

        if let Some(category) = scan(base) {
            return Err(DatabaseError::config(format!(
                "connection string rejected: contains {}",
                category
            )));
        }

        let style = ParamStyle::detect(self.backend, base);
        if self.strict && !fits_allow_list(base, style) {
            return Err(DatabaseError::config(
                "connection string contains characters outside the permitted set",
            ));
        }

        check_structure(self.backend, base)?;

        let rules = DialectRules::for_backend(self.backend);
        let base_params = existing_params(base, style);
        if has_case_duplicates(base_params.iter().map(|(k, _)| k.as_str())) {
            return Err(DatabaseError::config(
                "connection string sets a parameter more than once",
            ));
        }
        if has_case_duplicates(self.options.keys().map(String::as_str)) {
            return Err(DatabaseError::config(
                "connection options set a parameter more than once (keys differ only in case)",
            ));
        }
        self.check_tls(rules, &base_params)?;

        let mut accepted: Vec<(&str, &str)> = Vec::new();
        for (key, value) in self.options {
            if find_param(&base_params, key).is_some() {
                debug!(option = %key, "option already present in connection string, keeping base value");
                continue;
            }
            if !is_param_key(key) {
                warn!("omitting connection option with an invalid name");
                continue;
            }
            if let Some(category) = scan(key).or_else(|| scan(value)) {
                warn!(option = %key, category = %category, "omitting unsafe connection option");
                continue;
            }
            if !value_fits(style, value) || (self.strict && !fits_allow_list(value, style)) {
                warn!(option = %key, "omitting connection option with unsupported characters");
                continue;
            }
            accepted.push((key.as_str(), value.as_str()));
        }

        let mut params: Vec<(&str, &str)> = rules
            .defaults
            .iter()
            .filter(|(key, _)| {
                find_param(&base_params, key).is_none()
                    && !accepted.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
            })
            .copied()
            .collect();
        params.extend(accepted);

        Ok(render(base, style, &params))
    }

    fn check_tls(&self, rules: &DialectRules, base_params: &[(String, String)]) -> Result<()> {
        let Some(tls_key) = rules.tls_key else {
            return Ok(());
        };

        let from_base = find_param(base_params, tls_key);
        let from_options = find_option(self.options, tls_key);

        for mode in [from_base, from_options].into_iter().flatten() {
            if !rules.tls_modes.contains(&mode.to_ascii_lowercase().as_str()) {
                return Err(DatabaseError::config(format!(
                    "invalid TLS mode for {}: expected one of {}",
                    self.backend,
                    rules.tls_modes.join(", ")
                )));
            }
        }

        let effective = from_base
            .or(from_options)
            .or_else(|| rules.default_for(tls_key))
            .unwrap_or_default()
            .to_ascii_lowercase();

        if rules.verifying_modes.contains(&effective.as_str()) {
            for cert_key in rules.certificate_keys {
                let referenced = find_param(base_params, cert_key)
                    .or_else(|| find_option(self.options, cert_key));
                if let Some(path) = referenced {
                    if !Path::new(path).is_file() {
                        return Err(DatabaseError::config(format!(
                            "certificate file referenced by `{}` does not exist",
                            cert_key
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Build the connection string for a backend, base string and options.
pub fn build_dsn(
    backend: DatabaseBackend,
    base: &str,
    options: &BTreeMap<String, String>,
    strict: bool,
) -> Result<String> {
    DsnBuilder::new(backend, base)
        .options(options)
        .strict(strict)
        .build()
}

/// Split a query-style string into its head and decoded-as-is parameters.
pub fn split_query(dsn: &str) -> (&str, Vec<(String, String)>) {
    match dsn.split_once('?') {
        Some((head, query)) => (head, parse_pairs(query.split('&'))),
        None => (dsn, Vec::new()),
    }
}

/// Parse the whitespace separated `k=v` pairs of a key/value string.
pub fn split_key_value(dsn: &str) -> Vec<(String, String)> {
    parse_pairs(dsn.split_whitespace())
}

fn parse_pairs<'s>(parts: impl Iterator<Item = &'s str>) -> Vec<(String, String)> {
    parts
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), trim_quotes(v.trim()).to_string()))
        .collect()
}

fn trim_quotes(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

fn existing_params(base: &str, style: ParamStyle) -> Vec<(String, String)> {
    match style {
        ParamStyle::Query => split_query(base).1,
        ParamStyle::KeyValue => split_key_value(base),
    }
}

fn find_param<'p>(params: &'p [(String, String)], key: &str) -> Option<&'p str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn find_option<'o>(options: &'o BTreeMap<String, String>, key: &str) -> Option<&'o str> {
    options
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Parameter names are matched case-insensitively, so `TLS` and `tls`
/// name the same parameter.
fn has_case_duplicates<'k>(keys: impl Iterator<Item = &'k str>) -> bool {
    let mut seen = HashSet::new();
    keys.map(str::to_ascii_lowercase).any(|key| !seen.insert(key))
}

fn strip_scheme(base: &str) -> &str {
    base.split_once("://").map(|(_, rest)| rest).unwrap_or(base)
}

fn check_structure(backend: DatabaseBackend, base: &str) -> Result<()> {
    let head = split_query(base).0;
    let ok = match backend {
        DatabaseBackend::MySQL => strip_scheme(head).contains('/'),
        DatabaseBackend::PostgreSQL => {
            if base.contains("://") {
                strip_scheme(head).contains('/')
            } else {
                base.contains('=')
            }
        }
        DatabaseBackend::SQLite => {
            let path = head
                .strip_prefix("sqlite://")
                .or_else(|| head.strip_prefix("sqlite:"))
                .or_else(|| head.strip_prefix("file:"))
                .unwrap_or(head);
            !path.is_empty() && !path.ends_with('/') && !path.ends_with('\\')
        }
    };

    if ok {
        Ok(())
    } else {
        Err(DatabaseError::config(format!(
            "malformed {} connection string: missing database name or path",
            backend
        )))
    }
}

fn is_param_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn value_fits(style: ParamStyle, value: &str) -> bool {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return false;
    }
    match style {
        ParamStyle::Query => !value.contains(['&', '?', '#']),
        ParamStyle::KeyValue => !value.contains(['\'', '"', '\\']),
    }
}

fn fits_allow_list(input: &str, style: ParamStyle) -> bool {
    input.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || "_.-:/@()?=&%+,~[]".contains(c)
            || (c == ' ' && style == ParamStyle::KeyValue)
    })
}

fn render(base: &str, style: ParamStyle, params: &[(&str, &str)]) -> String {
    let mut out = base.to_string();
    if params.is_empty() {
        return out;
    }
    let joined: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    match style {
        ParamStyle::Query => {
            if !base.contains('?') {
                out.push('?');
            } else if !base.ends_with('?') && !base.ends_with('&') {
                out.push('&');
            }
            out.push_str(&joined.join("&"));
        }
        ParamStyle::KeyValue => {
            for param in joined {
                out.push(' ');
                out.push_str(&param);
            }
        }
    }
    out
}
