//! Configuration Loading Tests
//!
//! File loading, environment expansion and validation failures.

use gatehouse::authz::Access;
use gatehouse::config::{Config, ConfigError, ConfigLoader, ProviderConfig};
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const MINIMAL: &str = r#"
server:
  address: "127.0.0.1:8080"
identity:
  provider:
    type: jwt
    secret: "s3cret"
"#;

mod tests {
    use super::*;

    #[test]
    fn test_example_config_loads() {
        let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.yaml"))
            .expect("example config should be valid");

        assert_eq!(config.routes.len(), 3);
        assert_eq!(config.routes[0].id, "core-api");
        assert_eq!(config.routes[0].strip_prefix, 1);
        assert_eq!(config.policy.default, Access::Public);
        assert_eq!(config.policy.rules.len(), 3);
        assert!(matches!(config.identity.provider, ProviderConfig::Firebase(_)));
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(MINIMAL);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.address, "127.0.0.1:8080");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load("/definitely/not/here.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    #[serial]
    fn test_env_expansion_in_file() {
        std::env::set_var("GATEHOUSE_TEST_PROJECT", "chokak-staging");
        let file = write_config(
            r#"
server:
  address: "127.0.0.1:8080"
identity:
  provider:
    type: firebase
    project_id: "${GATEHOUSE_TEST_PROJECT}"
"#,
        );

        let config = Config::load(file.path()).unwrap();
        std::env::remove_var("GATEHOUSE_TEST_PROJECT");

        match config.identity.provider {
            ProviderConfig::Firebase(firebase) => {
                assert_eq!(firebase.project_id, "chokak-staging");
                assert_eq!(firebase.cache_ttl_seconds, 3600);
            }
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_env_default_used_when_unset() {
        std::env::remove_var("GATEHOUSE_TEST_CORE_URL");
        let config = ConfigLoader::from_yaml(&format!(
            "{}{}",
            MINIMAL,
            r#"
routes:
  - id: core-api
    paths: ["/api/**"]
    uri: "${GATEHOUSE_TEST_CORE_URL:-http://core:8080}"
"#
        ))
        .unwrap();

        assert_eq!(config.routes[0].uri, "http://core:8080");
    }

    #[test]
    fn test_unknown_provider_type() {
        let result = ConfigLoader::from_yaml(
            r#"
server:
  address: "127.0.0.1:8080"
identity:
  provider:
    type: ldap
"#,
        );
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            ("bad address", MINIMAL.replace("127.0.0.1:8080", "nowhere")),
            (
                "duplicate route",
                format!(
                    "{}{}",
                    MINIMAL,
                    r#"
routes:
  - id: a
    paths: ["/a/**"]
    uri: "http://a"
  - id: a
    paths: ["/b/**"]
    uri: "http://b"
"#
                ),
            ),
            (
                "relative pattern",
                format!(
                    "{}{}",
                    MINIMAL,
                    r#"
routes:
  - id: a
    paths: ["a/**"]
    uri: "http://a"
"#
                ),
            ),
            (
                "non-http upstream",
                format!(
                    "{}{}",
                    MINIMAL,
                    r#"
routes:
  - id: a
    paths: ["/a/**"]
    uri: "ftp://a"
"#
                ),
            ),
            (
                "bad method",
                format!(
                    "{}{}",
                    MINIMAL,
                    r#"
policy:
  rules:
    - paths: ["/a"]
      method: "GET POST"
      access: authenticated
"#
                ),
            ),
            (
                "bad namespace",
                MINIMAL.replace("identity:\n", "identity:\n  namespace: not-a-uuid\n"),
            ),
        ];

        for (name, yaml) in cases {
            assert!(
                matches!(
                    ConfigLoader::from_yaml(&yaml),
                    Err(ConfigError::ValidationError(_))
                ),
                "{} should fail validation",
                name
            );
        }
    }
}
