use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::dcm2niix::DEFAULT_VERSION;
use crate::options::{Options, Setting};
use crate::registry::DOCKER_HUB_URL;

/// Default runtime configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/dcm2niix_runner.toml";
/// Default container backend.
pub const DEFAULT_BACKEND: &str = "singularity";
/// Default CSV path for the batch report.
pub const DEFAULT_REPORT_CSV: &str = "report.csv";
/// Default JSON path for the batch report.
pub const DEFAULT_REPORT_JSON: &str = "report.json";
/// Default number of conversions running at the same time in batch mode.
pub const DEFAULT_CONCURRENCY: usize = 2;

#[derive(Deserialize, Default)]
/// Runtime overrides loaded from the TOML config referenced by `main`.
pub struct RuntimeConfigFile {
    pub backend: Option<String>,
    pub version: Option<String>,
    pub download_folder: Option<PathBuf>,
    pub registry_url: Option<String>,
    pub concurrency: Option<usize>,
    pub report_csv: Option<PathBuf>,
    pub report_json: Option<PathBuf>,
    /// dcm2niix options keyed by option name, e.g. `compress = true`.
    pub options: Option<toml::Table>,
}

/// Final configuration used to build and run dcm2niix.
pub struct EffectiveConfig {
    pub backend: String,
    pub version: String,
    pub download_folder: Option<PathBuf>,
    pub registry_url: String,
    pub concurrency: usize,
    pub report_csv: PathBuf,
    pub report_json: PathBuf,
    pub options: toml::Table,
}

impl EffectiveConfig {
    /// Returns the crate-level defaults before CLI/runtime overrides are merged.
    pub fn defaults() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            version: DEFAULT_VERSION.to_string(),
            download_folder: None,
            registry_url: DOCKER_HUB_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            report_csv: PathBuf::from(DEFAULT_REPORT_CSV),
            report_json: PathBuf::from(DEFAULT_REPORT_JSON),
            options: toml::Table::new(),
        }
    }
}

/// Attempts to read the runtime config file and deserialize CLI overrides.
///
/// Returns `Ok(None)` when the file is missing so defaults are preserved.
pub fn load_runtime_config(path: Option<&PathBuf>) -> Result<Option<RuntimeConfigFile>> {
    let path = match path {
        Some(path) => path.clone(),
        None => PathBuf::from(DEFAULT_CONFIG_PATH),
    };

    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path).context("Failed to read runtime config")?;
    let parsed: RuntimeConfigFile =
        toml::from_str(&content).context("Failed to parse runtime config")?;
    Ok(Some(parsed))
}

/// Trims whitespace and drops empty strings from optional CLI values.
pub fn sanitize_optional_string(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

/// Converts a TOML option value into a logical setting.
pub fn setting_from_toml(key: &str, value: &toml::Value) -> Result<Setting> {
    match value {
        toml::Value::Boolean(b) => Ok(Setting::Bool(*b)),
        toml::Value::Integer(i) => Ok(Setting::Int(*i)),
        toml::Value::String(s) => Ok(Setting::Str(s.clone())),
        other => bail!(
            "Option '{}' must be a boolean, integer or string, got {}",
            key,
            other.type_str()
        ),
    }
}

/// Parses a `key=value` command-line option override.
pub fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing option name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Applies config-file options, then command-line overrides, through the
/// validated setters.
pub fn apply_options(
    options: &mut Options,
    file_options: &toml::Table,
    overrides: &[(String, String)],
) -> Result<()> {
    for (key, value) in file_options {
        let setting = setting_from_toml(key, value)?;
        options
            .set_by_key(key, setting)
            .with_context(|| format!("Invalid option '{}' in config file", key))?;
    }
    for (key, value) in overrides {
        options
            .set_by_key(key, Setting::parse_cli(value))
            .with_context(|| format!("Invalid option override '{}={}'", key, value))?;
    }
    Ok(())
}

/// Reads the DICOM directories listed in a CSV file (first column, with a
/// header row) or a JSON array of strings or `{"input" | "path" | "dir": ..}`
/// objects.
///
/// Relative entries are resolved against the list file's directory and
/// repeated entries are dropped. Entries that are not directories are kept,
/// so they show up as failures in the report, but are logged.
pub fn parse_input_file(path: &Path) -> Result<Vec<PathBuf>> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase);
    let entries = match extension.as_deref() {
        Some("csv") => read_csv_entries(path)?,
        Some("json") => read_json_entries(path)?,
        _ => bail!(
            "Unsupported input list {}. Use .csv or .json",
            path.display()
        ),
    };

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut inputs: Vec<PathBuf> = Vec::with_capacity(entries.len());
    for entry in entries {
        let dir = base.join(entry);
        if inputs.contains(&dir) {
            debug!("Skipping repeated input {}", dir.display());
            continue;
        }
        if !dir.is_dir() {
            warn!("Listed input {} is not a directory", dir.display());
        }
        inputs.push(dir);
    }
    Ok(inputs)
}

fn read_csv_entries(path: &Path) -> Result<Vec<String>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut entries = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if let Some(dir) = record.get(0).map(str::trim).filter(|s| !s.is_empty()) {
            entries.push(dir.to_string());
        }
    }
    Ok(entries)
}

fn read_json_entries(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let value: Value = serde_json::from_reader(file)?;
    let Value::Array(items) = value else {
        return Err(anyhow!("JSON root must be an array"));
    };
    let entries = items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => ["input", "path", "dir"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str)),
            _ => None,
        })
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionId;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_default_version_image_url() {
        let defaults = EffectiveConfig::defaults();
        let backend: crate::runtime::Backend = defaults.backend.parse().unwrap();
        assert_eq!(
            backend.image_url(&defaults.version),
            "docker://svdvoort/dcm2niix:1.0.20211006"
        );
    }

    #[test]
    fn test_load_missing_config() {
        let missing = PathBuf::from("/nonexistent/dcm2niix_runner.toml");
        assert!(load_runtime_config(Some(&missing)).unwrap().is_none());
    }

    #[test]
    fn test_load_runtime_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "config.toml",
            r#"
backend = "docker"
version = "v1.0.20230411"
concurrency = 4

[options]
compress = true
filename = "%p_%s"
compression_level = 9
"#,
        );

        let parsed = load_runtime_config(Some(&path)).unwrap().unwrap();
        assert_eq!(parsed.backend.as_deref(), Some("docker"));
        assert_eq!(parsed.version.as_deref(), Some("v1.0.20230411"));
        assert_eq!(parsed.concurrency, Some(4));

        let mut options = Options::default();
        apply_options(&mut options, &parsed.options.unwrap(), &[]).unwrap();
        assert_eq!(options.wire_value(OptionId::Compress), Some("y"));
        assert_eq!(options.filename(), "%p_%s");
        assert_eq!(options.compression_level(), 9);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut file_options = toml::Table::new();
        file_options.insert("compress".into(), toml::Value::Boolean(true));

        let mut options = Options::default();
        apply_options(
            &mut options,
            &file_options,
            &[("compress".to_string(), "false".to_string())],
        )
        .unwrap();
        assert_eq!(options.wire_value(OptionId::Compress), Some("n"));
    }

    #[test]
    fn test_invalid_option_in_file() {
        let mut file_options = toml::Table::new();
        file_options.insert("compression_level".into(), toml::Value::Integer(15));

        let mut options = Options::default();
        let err = apply_options(&mut options, &file_options, &[]).unwrap_err();
        assert!(format!("{:#}", err).contains("you passed '15'"));
        assert_eq!(options.compression_level(), 6);
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("filename=%p_%s").unwrap(),
            ("filename".to_string(), "%p_%s".to_string())
        );
        assert!(parse_key_val("compress").is_err());
        assert!(parse_key_val("=y").is_err());
    }

    #[test]
    fn test_parse_input_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "inputs.csv", "input\n/data/a\n  \n/data/b \n");
        assert_eq!(
            parse_input_file(&path).unwrap(),
            vec![PathBuf::from("/data/a"), PathBuf::from("/data/b")]
        );
    }

    #[test]
    fn test_parse_input_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(
            &dir,
            "inputs.json",
            r#"["/data/a", {"path": "/data/b"}, {"other": 1}, ""]"#,
        );
        assert_eq!(
            parse_input_file(&path).unwrap(),
            vec![PathBuf::from("/data/a"), PathBuf::from("/data/b")]
        );
    }

    #[test]
    fn test_parse_input_resolves_relative_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("study1")).unwrap();
        let path = write_temp(&dir, "inputs.csv", "dir\nstudy1\nstudy1\nmissing\n");

        assert_eq!(
            parse_input_file(&path).unwrap(),
            vec![dir.path().join("study1"), dir.path().join("missing")]
        );
    }

    #[test]
    fn test_parse_input_json_root_must_be_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "inputs.json", r#"{"input": "/data/a"}"#);
        let err = parse_input_file(&path).unwrap_err();
        assert!(err.to_string().contains("must be an array"));
    }

    #[test]
    fn test_parse_input_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "inputs.txt", "/data/a");
        assert!(parse_input_file(&path).is_err());
    }
}
