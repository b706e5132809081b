//! Configuration loader and validator for the guest-workflow runner.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::WorkflowColumns;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub operator: Operator,
    pub form: Form,
    pub contacts: Contacts,
    pub vms: Vms,
    pub retention: Retention,
    #[serde(default)]
    pub sheet: Option<Sheet>,
}

/// App-level settings: where the store lives and how dispatch runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub store_path: String,
    pub staging_dir: String,
    pub logs_dir: String,
    pub workers: usize,
    pub completed_marker: String,
}

/// Operator identity sent along with form submissions and VMS logins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operator {
    pub name: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Form {
    pub url: String,
    pub status_column: String,
    pub date_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contacts {
    pub status_column: String,
    pub date_column: String,
}

/// Visitor Management System endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vms {
    pub base_url: String,
    pub password: String,
    pub fallback_email: String,
    pub parking_map_path: String,
    pub register: ColumnPair,
    pub import: ColumnPair,
    /// When true, a bulk import is only "complete" if every submitted row
    /// imported; when false any partial success marks the batch complete.
    pub require_full_success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnPair {
    pub status_column: String,
    pub date_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retention {
    pub store_days: i64,
}

/// Optional mirrored-spreadsheet settings. The sheet keeps its own
/// retention window; it is a short-lived operational view, not the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sheet {
    pub base_url: String,
    pub token: String,
    pub retention_days: i64,
    pub status_column: String,
    pub date_column: String,
}

impl ColumnPair {
    pub fn columns(&self) -> WorkflowColumns {
        WorkflowColumns::new(&self.status_column, &self.date_column)
    }
}

impl Config {
    /// Ensure required directories exist (logs and staging).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.logs_dir)?;
        fs::create_dir_all(&self.app.staging_dir)
    }

    pub fn form_columns(&self) -> WorkflowColumns {
        WorkflowColumns::new(&self.form.status_column, &self.form.date_column)
    }

    pub fn contacts_columns(&self) -> WorkflowColumns {
        WorkflowColumns::new(&self.contacts.status_column, &self.contacts.date_column)
    }

    pub fn sheet_columns(&self) -> Option<WorkflowColumns> {
        self.sheet
            .as_ref()
            .map(|s| WorkflowColumns::new(&s.status_column, &s.date_column))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance. Required values have no defaults:
/// anything missing or blank fails here, before any I/O happens.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.store_path.trim().is_empty() {
        return Err(ConfigError::Invalid("app.store_path must be non-empty"));
    }
    if cfg.app.staging_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.staging_dir must be non-empty"));
    }
    if cfg.app.logs_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.logs_dir must be non-empty"));
    }
    if cfg.app.workers == 0 {
        return Err(ConfigError::Invalid("app.workers must be > 0"));
    }
    if cfg.app.completed_marker.trim().is_empty() {
        return Err(ConfigError::Invalid("app.completed_marker must be non-empty"));
    }

    if cfg.operator.name.trim().is_empty() {
        return Err(ConfigError::Invalid("operator.name must be non-empty"));
    }
    if cfg.operator.phone.trim().is_empty() {
        return Err(ConfigError::Invalid("operator.phone must be non-empty"));
    }
    if cfg.operator.email.trim().is_empty() {
        return Err(ConfigError::Invalid("operator.email must be non-empty"));
    }

    if cfg.form.url.trim().is_empty() {
        return Err(ConfigError::Invalid("form.url must be non-empty"));
    }
    if cfg.form.status_column.trim().is_empty() {
        return Err(ConfigError::Invalid("form.status_column must be non-empty"));
    }
    if cfg.form.date_column.trim().is_empty() {
        return Err(ConfigError::Invalid("form.date_column must be non-empty"));
    }

    if cfg.contacts.status_column.trim().is_empty() {
        return Err(ConfigError::Invalid("contacts.status_column must be non-empty"));
    }
    if cfg.contacts.date_column.trim().is_empty() {
        return Err(ConfigError::Invalid("contacts.date_column must be non-empty"));
    }

    if cfg.vms.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("vms.base_url must be non-empty"));
    }
    if cfg.vms.password.trim().is_empty() {
        return Err(ConfigError::Invalid("vms.password must be non-empty"));
    }
    if cfg.vms.fallback_email.trim().is_empty() {
        return Err(ConfigError::Invalid("vms.fallback_email must be non-empty"));
    }
    if cfg.vms.parking_map_path.trim().is_empty() {
        return Err(ConfigError::Invalid("vms.parking_map_path must be non-empty"));
    }
    if cfg.vms.register.status_column.trim().is_empty() {
        return Err(ConfigError::Invalid("vms.register.status_column must be non-empty"));
    }
    if cfg.vms.register.date_column.trim().is_empty() {
        return Err(ConfigError::Invalid("vms.register.date_column must be non-empty"));
    }
    if cfg.vms.import.status_column.trim().is_empty() {
        return Err(ConfigError::Invalid("vms.import.status_column must be non-empty"));
    }
    if cfg.vms.import.date_column.trim().is_empty() {
        return Err(ConfigError::Invalid("vms.import.date_column must be non-empty"));
    }

    if cfg.retention.store_days < 0 {
        return Err(ConfigError::Invalid("retention.store_days must be >= 0"));
    }

    if let Some(sheet) = &cfg.sheet {
        if sheet.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("sheet.base_url must be non-empty"));
        }
        if sheet.token.trim().is_empty() {
            return Err(ConfigError::Invalid("sheet.token must be non-empty"));
        }
        if sheet.retention_days < 0 {
            return Err(ConfigError::Invalid("sheet.retention_days must be >= 0"));
        }
        if sheet.status_column.trim().is_empty() {
            return Err(ConfigError::Invalid("sheet.status_column must be non-empty"));
        }
        if sheet.date_column.trim().is_empty() {
            return Err(ConfigError::Invalid("sheet.date_column must be non-empty"));
        }
    }

    Ok(())
}

/// Returns a complete example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  store_path: "./data/reservations.csv"
  staging_dir: "./staging"
  logs_dir: "./logs"
  workers: 5
  completed_marker: "Completed"

operator:
  name: "Jane Operator"
  phone: "60123456789"
  email: "operator@example.com"

form:
  url: "https://docs.google.com/forms/d/e/FORM_ID/formResponse"
  status_column: "google form status"
  date_column: "google form date"

contacts:
  status_column: "contact export status"
  date_column: "contact export date"

vms:
  base_url: "https://vms.example.com"
  password: "VMS_PASSWORD"
  fallback_email: "guest@example.com"
  parking_map_path: "./data/parking_map.json"
  register:
    status_column: "vms status"
    date_column: "vms date"
  import:
    status_column: "vms import status"
    date_column: "vms import date"
  require_full_success: true

retention:
  store_days: 30

sheet:
  base_url: "https://sheets.example.com/api/v1/sheets/SHEET_ID"
  token: "SHEET_TOKEN"
  retention_days: 7
  status_column: "sheet mirror status"
  date_column: "sheet mirror date"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.workers, 5);
        assert_eq!(cfg.form_columns().status, "google form status");
    }

    #[test]
    fn invalid_blank_store_path() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.store_path = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("store_path")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_zero_workers() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.workers = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_vms_columns() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.vms.register.status_column = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("vms.register.status_column")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.vms.import.date_column = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn sheet_section_is_optional() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sheet = None;
        validate(&cfg).unwrap();
        assert!(cfg.sheet_columns().is_none());
    }

    #[test]
    fn invalid_sheet_token_when_present() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sheet.as_mut().unwrap().token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("sheet.token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn ensure_dirs_creates_dirs() {
        let td = tempdir().unwrap();
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.logs_dir = td.path().join("logs").to_string_lossy().to_string();
        cfg.app.staging_dir = td.path().join("staging").to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("logs").exists());
        assert!(td.path().join("staging").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.completed_marker, "Completed");
    }
}
