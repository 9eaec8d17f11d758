/// Collection environments
///
/// `<collection>/environments/<name>.env` holds `KEY=VALUE` lines that seed a run's
/// variables. Blank lines and `#` comments are skipped, values may be wrapped in single
/// or double quotes, and a value that parses as JSON (number, boolean, object...) keeps
/// its JSON type.

use crate::error::Result;
use crate::flow::storage::validate_name;
use crate::runtime::context::Variables;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const ENVIRONMENTS_DIR: &str = "environments";

/// Path of the environment file called `name`
pub fn environment_path(collection: &Path, name: &str) -> Result<PathBuf> {
    validate_name(name)?;
    Ok(collection.join(ENVIRONMENTS_DIR).join(format!("{}.env", name)))
}

/// Read and parse an environment file
pub async fn load_environment(collection: &Path, name: &str) -> Result<Variables> {
    let path = environment_path(collection, name)?;
    let text = tokio::fs::read_to_string(&path).await?;
    let variables = parse_environment(&text);
    tracing::debug!("🌱 Loaded environment '{}' ({} variables)", name, variables.len());
    Ok(variables)
}

/// Parse `KEY=VALUE` lines; malformed lines are skipped with a warning
pub fn parse_environment(text: &str) -> Variables {
    let mut variables = Variables::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, raw)) = line.split_once('=') else {
            tracing::warn!("⚠️ Skipping environment line {}: no '='", number + 1);
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            tracing::warn!("⚠️ Skipping environment line {}: empty key", number + 1);
            continue;
        }
        variables.insert(key.to_string(), parse_value(raw.trim()));
    }
    variables
}

fn parse_value(raw: &str) -> Value {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Value::String(raw[1..raw.len() - 1].to_string());
        }
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if !value.is_string() => value,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_environment() {
        let vars = parse_environment(
            "# staging\nhost=api.staging.example.com\n\nexport retries = 3\ntoken=\"a=b c\"\nflags={\"beta\": true}\nbroken line\n=orphan\n",
        );
        assert_eq!(vars.get("host"), Some(&json!("api.staging.example.com")));
        assert_eq!(vars.get("retries"), Some(&json!(3)));
        assert_eq!(vars.get("token"), Some(&json!("a=b c")));
        assert_eq!(vars.get("flags"), Some(&json!({ "beta": true })));
        assert_eq!(vars.len(), 4);
    }

    #[test]
    fn test_quoted_numbers_stay_strings() {
        let vars = parse_environment("zip='01234'");
        assert_eq!(vars.get("zip"), Some(&json!("01234")));
    }

    #[tokio::test]
    async fn test_load_environment_from_collection() {
        let dir = tempfile::tempdir().unwrap();
        let env_dir = dir.path().join(ENVIRONMENTS_DIR);
        tokio::fs::create_dir_all(&env_dir).await.unwrap();
        tokio::fs::write(env_dir.join("dev.env"), "host=localhost:8080\n")
            .await
            .unwrap();

        let vars = load_environment(dir.path(), "dev").await.unwrap();
        assert_eq!(vars.get("host"), Some(&json!("localhost:8080")));
        assert!(load_environment(dir.path(), "../dev").await.is_err());
    }
}
