//! Rewriting of the server's companion `key=value` files
//!
//! Before every start the supervisor accepts the license (`eula.txt`) and
//! forces a handful of `server.properties` entries. Existing keys are replaced
//! in place, unknown keys are appended, so re-applying is a no-op.

use std::collections::BTreeMap;
use std::path::Path;

use regex::{NoExpand, Regex};

use super::SupervisorError;
use crate::ServerConfig;

pub const EULA_FILE: &str = "eula.txt";
pub const PROPERTIES_FILE: &str = "server.properties";

/// Properties derived from the server config, with YAML overrides applied last
pub fn server_properties(config: &ServerConfig) -> BTreeMap<String, String> {
    let mut props: BTreeMap<String, String> = [
        ("online-mode", "false".to_string()),
        ("difficulty", "peaceful".to_string()),
        ("spawn-monsters", "false".to_string()),
        ("spawn-animals", "true".to_string()),
        ("spawn-npcs", "true".to_string()),
        ("max-players", config.max_players.to_string()),
        ("server-port", config.port.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    for (key, value) in &config.extra_properties {
        props.insert(key.clone(), value.clone());
    }
    props
}

/// Apply `entries` to the text of a properties file
pub fn rewrite_properties(
    contents: &str,
    entries: &BTreeMap<String, String>,
) -> Result<String, regex::Error> {
    let mut out = contents.to_string();
    let mut missing = Vec::new();

    for (key, value) in entries {
        let pattern = Regex::new(&format!(r"(?m)^{}=.*$", regex::escape(key)))?;
        let line = format!("{key}={value}");
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, NoExpand(&line)).into_owned();
        } else {
            missing.push(line);
        }
    }

    if !missing.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        for line in missing {
            out.push_str(&line);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Rewrite the file at `path` in place, creating it if absent
pub async fn apply_properties(
    path: &Path,
    entries: &BTreeMap<String, String>,
) -> Result<(), SupervisorError> {
    let file_error = |reason: String| SupervisorError::PropertyFile {
        path: path.to_path_buf(),
        reason,
    };

    let current = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(file_error(e.to_string())),
    };

    let updated = rewrite_properties(&current, entries).map_err(|e| file_error(e.to_string()))?;
    if updated != current {
        tokio::fs::write(path, updated)
            .await
            .map_err(|e| file_error(e.to_string()))?;
        tracing::debug!(file = %path.display(), keys = entries.len(), "Rewrote properties file");
    }
    Ok(())
}

/// Accept the license and force the configured properties in `dir`
pub async fn prepare_server_directory(
    dir: &Path,
    config: &ServerConfig,
) -> Result<(), SupervisorError> {
    let eula = BTreeMap::from([("eula".to_string(), "true".to_string())]);
    apply_properties(&dir.join(EULA_FILE), &eula).await?;
    apply_properties(&dir.join(PROPERTIES_FILE), &server_properties(config)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_replaces_in_place_and_appends_missing() {
        let original = "#Minecraft server properties\nmotd=hello\nonline-mode=true\nmax-players=20\n";
        let out = rewrite_properties(
            original,
            &entries(&[("online-mode", "false"), ("max-players", "10"), ("difficulty", "peaceful")]),
        )
        .unwrap();

        assert_eq!(
            out,
            "#Minecraft server properties\nmotd=hello\nonline-mode=false\nmax-players=10\ndifficulty=peaceful\n"
        );
    }

    #[test]
    fn test_only_line_anchored_keys_match() {
        let original = "white-list=false\nenforce-white-list=true\n";
        let out = rewrite_properties(original, &entries(&[("white-list", "true")])).unwrap();
        assert_eq!(out, "white-list=true\nenforce-white-list=true\n");
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let original = "level-seed=\ngamemode=survival";
        let props = entries(&[("gamemode", "creative"), ("server-port", "25565"), ("motd", "$1 cash")]);

        let once = rewrite_properties(original, &props).unwrap();
        let twice = rewrite_properties(&once, &props).unwrap();

        assert_eq!(once, twice);
        assert!(once.contains("motd=$1 cash\n"));
        assert!(once.starts_with("level-seed=\ngamemode=creative\n"));
    }

    #[test]
    fn test_server_properties_derived_from_config() {
        let mut config = ServerConfig::with_path("server.jar").unwrap();
        config.max_players = 4;
        config
            .extra_properties
            .insert("difficulty".into(), "hard".into());

        let props = server_properties(&config);
        assert_eq!(props["online-mode"], "false");
        assert_eq!(props["max-players"], "4");
        assert_eq!(props["server-port"], "25565");
        assert_eq!(props["difficulty"], "hard");
    }

    #[tokio::test]
    async fn test_prepare_directory_twice_yields_same_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROPERTIES_FILE), "pvp=true\nonline-mode=true\n").unwrap();
        let config = ServerConfig::with_path(dir.path().join("server.jar")).unwrap();

        prepare_server_directory(dir.path(), &config).await.unwrap();
        let first = std::fs::read_to_string(dir.path().join(PROPERTIES_FILE)).unwrap();
        prepare_server_directory(dir.path(), &config).await.unwrap();
        let second = std::fs::read_to_string(dir.path().join(PROPERTIES_FILE)).unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("pvp=true\nonline-mode=false\n"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(EULA_FILE)).unwrap(),
            "eula=true\n"
        );
    }
}
