//! Data directory resolution and the scenario catalog.
//!
//! Scenarios come from two places: the built-in catalog compiled into
//! `bridge-core`, and JSON files in `<data-dir>/scenarios/`. A file with the
//! same name as a built-in shadows it, so test suites can pin their own
//! variants without rebuilding.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use log::debug;

use bridge_core::scenario::{self, ScenarioDefinition};

use crate::BridgeError;

/// Resolve the data directory: the CLI override, the platform project dir,
/// or `./bridge-data` as a last resort.
pub fn data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    ProjectDirs::from("io", "nmea-bridge", "bridge")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("bridge-data"))
}

/// The scenarios directory under the data dir.
pub fn scenarios_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("scenarios")
}

/// Load a named scenario: a JSON file if present, otherwise a built-in.
///
/// The returned scenario has been validated; load failures carry the
/// validation reason.
pub fn load_scenario(data_dir: &Path, name: &str) -> Result<ScenarioDefinition, BridgeError> {
    let path = scenarios_dir(data_dir).join(format!("{}.json", name));
    if path.is_file() {
        debug!("Loading scenario '{}' from {}", name, path.display());
        let json = fs::read_to_string(&path)?;
        return Ok(ScenarioDefinition::from_json(&json)?);
    }
    scenario::builtin(name).ok_or_else(|| BridgeError::ScenarioNotFound(name.to_string()))
}

/// All available scenario names, built-ins plus files, sorted and deduplicated.
pub fn list_scenarios(data_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = scenario::builtin_scenarios()
        .into_iter()
        .map(|s| s.name)
        .collect();

    if let Ok(entries) = fs::read_dir(scenarios_dir(data_dir)) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
    }
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_load_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = load_scenario(dir.path(), "calm-cruise").unwrap();
        assert_eq!(scenario.name, "calm-cruise");
    }

    #[test]
    fn unknown_scenario_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_scenario(dir.path(), "does-not-exist"),
            Err(BridgeError::ScenarioNotFound(_))
        ));
    }

    #[test]
    fn file_scenario_shadows_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let scenarios = scenarios_dir(dir.path());
        fs::create_dir_all(&scenarios).unwrap();
        fs::write(
            scenarios.join("calm-cruise.json"),
            r#"{
                "name": "calm-cruise",
                "duration": 10.0,
                "events": [
                    {"at": 0.0, "patterns": {"SOG": {"kind": "constant", "value": 1.0}}}
                ]
            }"#,
        )
        .unwrap();

        let scenario = load_scenario(dir.path(), "calm-cruise").unwrap();
        assert_eq!(scenario.duration, 10.0);
    }

    #[test]
    fn invalid_file_scenario_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let scenarios = scenarios_dir(dir.path());
        fs::create_dir_all(&scenarios).unwrap();
        fs::write(
            scenarios.join("broken.json"),
            r#"{"name": "broken", "duration": -5.0, "events": [{"at": 0.0}]}"#,
        )
        .unwrap();

        assert!(matches!(
            load_scenario(dir.path(), "broken"),
            Err(BridgeError::Validation(_))
        ));
    }

    #[test]
    fn listing_merges_builtins_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let scenarios = scenarios_dir(dir.path());
        fs::create_dir_all(&scenarios).unwrap();
        fs::write(scenarios.join("custom.json"), "{}").unwrap();

        let names = list_scenarios(dir.path());
        assert!(names.contains(&"calm-cruise".to_string()));
        assert!(names.contains(&"custom".to_string()));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
