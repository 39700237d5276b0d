//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?: (?P<op>:?-) (?P<default>[^}]*) )?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every problem found, so all missing variables are reported at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();
    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| substitute(caps, &mut errors))
        .into_owned();
    InterpolationResult { text, errors }
}

fn substitute(caps: &Captures, errors: &mut Vec<String>) -> String {
    let original = &caps[0];
    if caps.name("escape").is_some() {
        return "$".to_string();
    }

    let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
        return original.to_string();
    };
    let name = name.as_str();
    let default = caps.name("default").map(|m| m.as_str());
    let empty_uses_default = caps.name("op").is_some_and(|m| m.as_str() == ":-");

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => {
            errors.push(format!(
                "environment variable '{name}' contains newlines, which is not allowed"
            ));
            original.to_string()
        }
        Ok(value) if value.is_empty() && empty_uses_default => {
            default.unwrap_or_default().to_string()
        }
        Ok(value) => value,
        Err(_) => match default {
            Some(default) => default.to_string(),
            None => {
                errors.push(format!("environment variable '{name}' is not set"));
                original.to_string()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        // SAFETY: each test uses variable names unique to that test
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        let result = f();

        // SAFETY: restoring the state captured above
        for (key, original) in originals {
            match original {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    #[test]
    fn test_bare_and_braced() {
        with_env_vars(&[("FLURRY_TEST_ACCOUNT", Some("devstore"))], || {
            let result = interpolate("url: $FLURRY_TEST_ACCOUNT/${FLURRY_TEST_ACCOUNT}");
            assert!(result.is_ok());
            assert_eq!(result.text, "url: devstore/devstore");
        });
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        with_env_vars(
            &[("FLURRY_TEST_MISSING_A", None), ("FLURRY_TEST_MISSING_B", None)],
            || {
                let result = interpolate("a: $FLURRY_TEST_MISSING_A\nb: ${FLURRY_TEST_MISSING_B}");
                assert_eq!(result.errors.len(), 2);
                assert!(result.errors[0].contains("FLURRY_TEST_MISSING_A"));
                assert!(result.errors[1].contains("not set"));
            },
        );
    }

    #[test]
    fn test_default_when_unset() {
        with_env_vars(&[("FLURRY_TEST_UNSET", None)], || {
            let result = interpolate("interval: ${FLURRY_TEST_UNSET:-10}");
            assert!(result.is_ok());
            assert_eq!(result.text, "interval: 10");
        });
    }

    #[test]
    fn test_empty_value_and_default_forms() {
        with_env_vars(&[("FLURRY_TEST_EMPTY", Some(""))], || {
            assert_eq!(interpolate("x: ${FLURRY_TEST_EMPTY:-fallback}").text, "x: fallback");
            assert_eq!(interpolate("x: ${FLURRY_TEST_EMPTY-fallback}").text, "x: ");
        });
    }

    #[test]
    fn test_newline_injection_rejected() {
        with_env_vars(&[("FLURRY_TEST_NEWLINE", Some("a\nb: c"))], || {
            let result = interpolate("x: $FLURRY_TEST_NEWLINE");
            assert!(!result.is_ok());
            assert!(result.errors[0].contains("newlines"));
        });
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate("pattern: $$logs/blob");
        assert!(result.is_ok());
        assert_eq!(result.text, "pattern: $logs/blob");
    }
}
