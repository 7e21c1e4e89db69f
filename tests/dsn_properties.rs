//! Connection-string builder properties and the MySQL TLS scenario.

use dbvault::config::DatabaseConfig;
use dbvault::database::{DatabaseBackend, DatabaseProvider, ProviderFactory};
use dbvault::logging::Logger;
use dbvault::security::build_dsn;
use dbvault::security::sanitize;
use proptest::prelude::*;
use std::collections::BTreeMap;

const DANGEROUS: &[&str] = &["DROP TABLE", "<script", "--", ";EXEC", "drop   table", "<SCRIPT>"];

const MYSQL_BASE: &str = "app:pw@tcp(localhost:3306)/shop";

/// Occurrences of `key=` as a whole query parameter
fn param_count(dsn: &str, key: &str) -> usize {
    let query = dsn.split_once('?').map(|(_, q)| q).unwrap_or("");
    query
        .split('&')
        .filter(|pair| pair.split_once('=').map(|(k, _)| k) == Some(key))
        .count()
}

/// Occurrences of `key=` ignoring letter case
fn param_count_any_case(dsn: &str, key: &str) -> usize {
    let query = dsn.split_once('?').map(|(_, q)| q).unwrap_or("");
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, _)| k.eq_ignore_ascii_case(key))
        .count()
}

/// `key` with a random mix of upper and lower case letters
fn any_case(key: &'static str) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<bool>(), key.len()).prop_map(move |upper| {
        key.chars()
            .zip(upper)
            .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c })
            .collect()
    })
}

fn mysql_option() -> impl Strategy<Value = (String, String)> {
    prop_oneof![
        prop::sample::select(vec!["5s", "15s", "1m"]).prop_map(|v| ("timeout".to_string(), v.to_string())),
        prop::sample::select(vec!["10s", "45s"]).prop_map(|v| ("readTimeout".to_string(), v.to_string())),
        prop::sample::select(vec!["10s", "45s"]).prop_map(|v| ("writeTimeout".to_string(), v.to_string())),
        prop::sample::select(vec!["utf8", "latin1"]).prop_map(|v| ("charset".to_string(), v.to_string())),
        prop::sample::select(vec!["true", "false", "required", "skip-verify"])
            .prop_map(|v| ("tls".to_string(), v.to_string())),
    ]
}

proptest! {
    #[test]
    fn dangerous_base_is_rejected_or_absent(
        prefix in "[a-z0-9]{0,8}",
        suffix in "[a-z0-9]{0,8}",
        pattern in prop::sample::select(DANGEROUS.to_vec()),
    ) {
        let base = format!("{}?note={}{}{}", MYSQL_BASE, prefix, pattern, suffix);
        match build_dsn(DatabaseBackend::MySQL, &base, &BTreeMap::new(), false) {
            Err(err) => prop_assert!(err.is_configuration()),
            Ok(dsn) => prop_assert!(!dsn.contains(pattern)),
        }
    }

    #[test]
    fn dangerous_option_is_dropped(
        value in "[a-z]{1,6}",
        pattern in prop::sample::select(DANGEROUS.to_vec()),
    ) {
        let mut options = BTreeMap::new();
        options.insert("comment".to_string(), format!("{}{}", value, pattern));
        options.insert("collation".to_string(), "utf8mb4_general_ci".to_string());

        let dsn = build_dsn(DatabaseBackend::MySQL, MYSQL_BASE, &options, false).unwrap();
        prop_assert!(!dsn.contains(pattern));
        prop_assert_eq!(param_count(&dsn, "comment"), 0);
        prop_assert_eq!(param_count(&dsn, "collation"), 1);
    }

    #[test]
    fn every_default_appears_exactly_once(
        options in prop::collection::btree_map(
            "[a-z]{1}", mysql_option(), 0..5
        ).prop_map(|m| m.into_values().collect::<BTreeMap<String, String>>()),
        in_base in prop::sample::subsequence(vec!["timeout", "charset"], 0..=2),
    ) {
        let mut base = MYSQL_BASE.to_string();
        for (i, key) in in_base.iter().enumerate() {
            base.push(if i == 0 { '?' } else { '&' });
            base.push_str(&format!("{}=base", key));
        }

        let dsn = build_dsn(DatabaseBackend::MySQL, &base, &options, false).unwrap();
        for key in ["tls", "timeout", "readTimeout", "writeTimeout", "charset"] {
            prop_assert_eq!(param_count(&dsn, key), 1, "{} in {}", key, dsn);
        }
        for key in &in_base {
            let expected = format!("{}=base", key);
            prop_assert!(dsn.contains(&expected));
        }
        for (key, value) in &options {
            if !in_base.contains(&key.as_str()) {
                let expected = format!("{}={}", key, value);
                prop_assert!(dsn.contains(&expected));
            }
        }
    }

    #[test]
    fn case_variant_duplicates_are_rejected(
        key in prop::sample::select(vec!["tls", "charset", "timeout", "readTimeout"]),
        seed in any::<u64>(),
    ) {
        let first = key.to_string();
        let second: String = key
            .chars()
            .enumerate()
            .map(|(i, c)| if (seed >> (i % 64)) & 1 == 1 { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
            .collect();
        prop_assume!(first != second);

        let mut options = BTreeMap::new();
        options.insert(first, "true".to_string());
        options.insert(second, "invalid".to_string());
        let err = build_dsn(DatabaseBackend::MySQL, MYSQL_BASE, &options, false).unwrap_err();
        prop_assert!(err.is_configuration());
    }

    #[test]
    fn any_case_option_replaces_its_default(
        key in any_case("tls"),
        mode in prop::sample::select(vec!["true", "false", "required", "skip-verify"]),
    ) {
        let mut options = BTreeMap::new();
        options.insert(key.clone(), mode.to_string());

        let dsn = build_dsn(DatabaseBackend::MySQL, MYSQL_BASE, &options, false).unwrap();
        for name in ["tls", "timeout", "readTimeout", "writeTimeout", "charset"] {
            prop_assert_eq!(param_count_any_case(&dsn, name), 1, "{} in {}", name, dsn);
        }
        let expected = format!("{}={}", key, mode);
        prop_assert!(dsn.contains(&expected));
    }

    #[test]
    fn sanitizer_masks_password_and_keeps_host(secret in "[A-Za-z0-9]{8,16}") {
        let message = format!("dial tcp: user:{}@host:3306 refused", secret);
        let clean = sanitize(&message);
        prop_assert!(!clean.contains(&secret));
        prop_assert!(clean.contains("host:3306"));
    }
}

#[tokio::test]
async fn test_invalid_tls_mode_fails_and_stays_disconnected() {
    let provider = ProviderFactory::create("mysql", Logger::silent()).unwrap();
    let config = DatabaseConfig::new("mysql", "user:pass@tcp(localhost:3306)/db")
        .with_option("tls", "invalid");

    let err = provider.connect(&config).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("TLS"));
    assert!(!provider.is_connected());
}

#[test]
fn test_postgres_key_value_defaults() {
    let dsn = build_dsn(
        DatabaseBackend::PostgreSQL,
        "host=db user=app dbname=inventory sslmode=require",
        &BTreeMap::new(),
        false,
    )
    .unwrap();
    assert_eq!(dsn.matches("sslmode=").count(), 1);
    assert!(dsn.contains("sslmode=require"));
    assert!(dsn.contains("connect_timeout=10"));
}
