//! Environment variable interpolation for config files.
//!
//! Supported syntax:
//! - `$VAR` or `${VAR}` - substitute the variable's value, error if missing
//! - `${VAR:-default}` - use the default if VAR is unset OR empty
//! - `${VAR-default}` - use the default only if VAR is unset
//! - `$$` - literal `$`

use regex::Regex;
use std::env;
use std::sync::LazyLock;

/// One pattern for all four syntax forms. Group 1/4 carry the variable name
/// (braced/unbraced), group 2 the `:-` vs `-` marker, group 3 the default.
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # literal $
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # braced variable name
            (?:
                (:?-)                  # default marker, with or without colon
                ([^}]*)                # default value
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # unbraced variable name
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Any errors encountered during interpolation.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
///
/// Errors are accumulated rather than short-circuited so every missing
/// variable is reported in one pass.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let full_match = caps.get(0).map_or("", |m| m.as_str());
            if full_match == "$$" {
                return "$".to_string();
            }
            match resolve(caps) {
                Ok(replacement) => replacement,
                Err(message) => {
                    errors.push(message);
                    // Leave the reference in place; the config load fails anyway.
                    full_match.to_string()
                }
            }
        })
        .to_string();

    InterpolationResult { text, errors }
}

/// Resolve one variable reference to its replacement text.
fn resolve(caps: &regex::Captures) -> Result<String, String> {
    let name = caps
        .get(1)
        .or_else(|| caps.get(4))
        .map(|m| m.as_str())
        .unwrap_or("");
    let marker = caps.get(2).map(|m| m.as_str());
    let default = caps.get(3).map(|m| m.as_str());

    match env::var(name) {
        Ok(value) => {
            // A value spanning lines could splice new keys into the YAML.
            if value.contains('\n') || value.contains('\r') {
                return Err(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
            }
            if value.is_empty() && marker == Some(":-") {
                return Ok(default.unwrap_or("").to_string());
            }
            Ok(value)
        }
        Err(_) => match default {
            Some(default) => Ok(default.to_string()),
            None => Err(format!("environment variable '{name}' is not set")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        // Save original values
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        // Set test values
        // SAFETY: These tests run serially (not in parallel) and we restore values after
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        let result = f();

        // Restore original values
        // SAFETY: Restoring original environment state
        for (key, original) in originals {
            match original {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    #[test]
    fn test_basic_substitution() {
        with_env_vars(&[("FLOE_TEST_BASIC", Some("hello"))], || {
            let result = interpolate("value: $FLOE_TEST_BASIC");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: hello");
        });
    }

    #[test]
    fn test_braced_substitution() {
        with_env_vars(&[("FLOE_TEST_BRACED", Some("world"))], || {
            let result = interpolate("value: ${FLOE_TEST_BRACED}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: world");
        });
    }

    #[test]
    fn test_missing_variable_error() {
        with_env_vars(&[("FLOE_TEST_MISSING", None)], || {
            let result = interpolate("value: $FLOE_TEST_MISSING");
            assert!(!result.is_ok());
            assert_eq!(result.errors.len(), 1);
            assert!(result.errors[0].contains("FLOE_TEST_MISSING"));
            assert!(result.errors[0].contains("not set"));
        });
    }

    #[test]
    fn test_default_used_when_unset() {
        with_env_vars(&[("FLOE_TEST_UNSET", None)], || {
            let result = interpolate("value: ${FLOE_TEST_UNSET:-fallback}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: fallback");
        });
    }

    #[test]
    fn test_colon_default_replaces_empty_value() {
        with_env_vars(&[("FLOE_TEST_EMPTY", Some(""))], || {
            let result = interpolate("value: ${FLOE_TEST_EMPTY:-fallback}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: fallback");
        });
    }

    #[test]
    fn test_bare_default_keeps_empty_value() {
        with_env_vars(&[("FLOE_TEST_EMPTY_BARE", Some(""))], || {
            let result = interpolate("value: ${FLOE_TEST_EMPTY_BARE-fallback}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: ");
        });
    }

    #[test]
    fn test_set_variable_wins_over_default() {
        with_env_vars(&[("FLOE_TEST_SET", Some("actual"))], || {
            let result = interpolate("value: ${FLOE_TEST_SET:-fallback}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: actual");
        });
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate("price: $$100");
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $100");
    }

    #[test]
    fn test_newline_injection_blocked() {
        with_env_vars(
            &[
                ("FLOE_TEST_INJECT_NL", Some("line1\nline2")),
                ("FLOE_TEST_INJECT_CR", Some("line1\rline2")),
            ],
            || {
                let result = interpolate("a: $FLOE_TEST_INJECT_NL, b: $FLOE_TEST_INJECT_CR");
                assert!(!result.is_ok());
                assert_eq!(result.errors.len(), 2);
                assert!(result.errors[0].contains("newlines"));
            },
        );
    }

    #[test]
    fn test_yaml_config_example() {
        with_env_vars(
            &[
                ("FLOE_TEST_BUCKET", Some("my-bucket")),
                ("FLOE_TEST_AWS_KEY", Some("AKIA123")),
                ("FLOE_TEST_AWS_REGION", None),
            ],
            || {
                let yaml = r#"
source:
  url: "s3://${FLOE_TEST_BUCKET}/exports/orders.json"
  storage_options:
    aws_access_key_id: ${FLOE_TEST_AWS_KEY}
    aws_region: ${FLOE_TEST_AWS_REGION:-us-east-1}
"#;
                let result = interpolate(yaml);
                assert!(result.is_ok());
                assert!(result.text.contains("s3://my-bucket/exports/orders.json"));
                assert!(result.text.contains("aws_access_key_id: AKIA123"));
                assert!(result.text.contains("aws_region: us-east-1"));
            },
        );
    }
}
