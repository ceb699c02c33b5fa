//! Configuration loader for YAML files

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::AppError;

use super::types::AppConfig;

/// Load configuration from a YAML file
///
/// Checks the file exists, parses the YAML, and validates the result.
pub fn load_config(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Err(AppError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let config: AppConfig = serde_yaml::from_reader(reader).map_err(|e| {
        AppError::Config(format!("YAML parse error in '{}': {}", path.display(), e))
    })?;

    config.validate()?;

    Ok(config)
}

/// Load configuration from a YAML string (useful for testing)
pub fn load_config_from_str(yaml_content: &str) -> Result<AppConfig, AppError> {
    let config: AppConfig = serde_yaml::from_str(yaml_content)
        .map_err(|e| AppError::Config(format!("YAML parse error: {}", e)))?;

    config.validate()?;

    Ok(config)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Region;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_CONFIG_YAML: &str = r#"
region: SG
broker:
  host: redis.sg.internal
  port: 6379
  db: 0
messaging:
  heartbeat_secs: 30
  block_ms: 1000
  pass_delay_ms: 100
  response_poll_ms: 200
  retention_days: 7
sync:
  interval_secs: 60
  kline_limit: 24
  timeframes: ["1h", "4h", "1d"]
  crypto_symbols: ["BTCUSDT", "ETHUSDT"]
  us_stock_symbols: ["AAPL"]
  cn_stock_symbols: ["000001.SZ"]
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let config = load_config_from_str(VALID_CONFIG_YAML).unwrap();
        assert_eq!(config.region, Region::SG);
        assert_eq!(config.broker.host, "redis.sg.internal");
        assert_eq!(config.sync.crypto_symbols.len(), 2);
    }

    #[test]
    fn test_defaults_applied_when_sections_missing() {
        let minimal = r#"
region: CN
broker:
  host: redis.cn.internal
  port: 6379
"#;
        let config = load_config_from_str(minimal).unwrap();
        assert_eq!(config.region, Region::CN);
        assert_eq!(config.messaging.heartbeat_secs, 30);
        assert_eq!(config.sync.interval_secs, 60);
    }

    #[test]
    fn test_load_config_from_str_invalid_yaml() {
        let result = load_config_from_str("region: [SG");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_load_config_from_str_validation_failure() {
        let invalid = r#"
region: SG
broker:
  host: ""
  port: 6379
"#;
        let result = load_config_from_str(invalid);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("broker.host"));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Configuration file not found"));
    }

    #[test]
    fn test_load_config_from_file_valid() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(VALID_CONFIG_YAML.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.region, Region::SG);
    }
}
