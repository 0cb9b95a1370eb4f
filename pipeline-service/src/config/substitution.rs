// Variable Substitution
// Replaces `{key}` placeholders in script arguments with variable values

use crate::config::models::VariableValue;

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

/// Whether `key` has the shape a placeholder can refer to
pub fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

/// Keys of every placeholder in `arg`, in order of appearance
pub fn placeholders(arg: &str) -> impl Iterator<Item = &str> {
    placeholder_pattern()
        .captures_iter(arg)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// Substitute a single argument. Unknown keys are left verbatim.
pub fn substitute_arg(arg: &str, variables: &HashMap<String, VariableValue>) -> String {
    placeholder_pattern()
        .replace_all(arg, |caps: &Captures| match variables.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Substitute every argument. Never fails.
pub fn substitute(args: &[String], variables: &HashMap<String, VariableValue>) -> Vec<String> {
    args.iter()
        .map(|arg| substitute_arg(arg, variables))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, VariableValue)]) -> HashMap<String, VariableValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_substitute_number() {
        let args = vec!["--epochs".to_string(), "{epochs}".to_string()];
        let result = substitute(&args, &vars(&[("epochs", VariableValue::Number(5.0))]));
        assert_eq!(result, vec!["--epochs", "5"]);
    }

    #[test]
    fn test_unresolved_placeholder_left_verbatim() {
        let args = vec!["{missing}".to_string(), "--lr={lr}".to_string()];
        let result = substitute(&args, &vars(&[("lr", VariableValue::Number(0.01))]));
        assert_eq!(result, vec!["{missing}", "--lr=0.01"]);
    }

    #[test]
    fn test_multiple_placeholders_in_one_arg() {
        let variables = vars(&[
            ("name", VariableValue::Text("exp".into())),
            ("run", VariableValue::Number(3.0)),
        ]);
        assert_eq!(substitute_arg("{name}-{run}-{name}", &variables), "exp-3-exp");
    }

    #[test]
    fn test_non_identifier_braces_ignored() {
        let variables = vars(&[("a", VariableValue::Text("x".into()))]);
        assert_eq!(substitute_arg("{\"json\": 1} {1abc}", &variables), "{\"json\": 1} {1abc}");
    }

    #[test]
    fn test_placeholders() {
        let keys: Vec<_> = placeholders("--data={data_dir}/{split}").collect();
        assert_eq!(keys, vec!["data_dir", "split"]);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("epochs"));
        assert!(is_identifier("_batch_size2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("learning-rate"));
        assert!(!is_identifier(""));
    }
}
