//! CLI argument validation functions
//!
//! This module provides custom validation functions for CLI arguments
//! that go beyond what clap can validate automatically.

use std::fs;
use std::path::PathBuf;

/// Longest `console --duration` accepted, one week
const MAX_DURATION_SECONDS: u64 = 7 * 24 * 3600;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!(
            "Cannot read configuration file '{}': {}",
            path_str, e
        )),
    }
}

/// Validate rollback steps is a positive number
pub fn validate_rollback_steps(steps_str: &str) -> Result<u32, String> {
    let steps: u32 = steps_str.parse().map_err(|_| {
        format!(
            "Rollback steps must be a valid positive number, got: '{}'",
            steps_str
        )
    })?;

    if steps == 0 {
        return Err("Rollback steps must be greater than 0".to_string());
    }

    if steps > 100 {
        return Err("Rollback steps cannot exceed 100 for safety reasons".to_string());
    }

    Ok(steps)
}

/// Validate a console run duration in seconds
pub fn validate_duration_seconds(duration_str: &str) -> Result<u64, String> {
    let seconds: u64 = duration_str.parse().map_err(|_| {
        format!(
            "Duration must be a whole number of seconds, got: '{}'",
            duration_str
        )
    })?;

    if seconds == 0 {
        return Err("Duration must be greater than 0 seconds".to_string());
    }

    if seconds > MAX_DURATION_SECONDS {
        return Err(format!(
            "Duration cannot exceed {} seconds",
            MAX_DURATION_SECONDS
        ));
    }

    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_steps_validation_valid() {
        for steps_str in ["1", "5", "10", "50", "100"] {
            let result = validate_rollback_steps(steps_str);
            assert!(result.is_ok(), "Steps {} should be valid", steps_str);
        }
    }

    #[test]
    fn test_rollback_steps_validation_invalid() {
        for steps_str in ["0", "101", "999", "-1", "abc", ""] {
            let result = validate_rollback_steps(steps_str);
            assert!(result.is_err(), "Steps '{}' should be invalid", steps_str);
        }
    }

    #[test]
    fn test_duration_validation() {
        assert_eq!(validate_duration_seconds("65"), Ok(65));
        assert_eq!(validate_duration_seconds("604800"), Ok(604_800));

        for duration in ["0", "604801", "-5", "1.5", "soon", ""] {
            assert!(
                validate_duration_seconds(duration).is_err(),
                "Duration '{}' should be invalid",
                duration
            );
        }
    }

    #[test]
    fn test_config_file_path_validation() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("perpetua.toml");
        std::fs::write(&file, "").unwrap();

        assert_eq!(
            validate_config_file_path(file.to_str().unwrap()),
            Ok(file.clone())
        );
        assert!(validate_config_file_path(dir.path().to_str().unwrap()).is_err());
        assert!(
            validate_config_file_path(dir.path().join("missing.toml").to_str().unwrap()).is_err()
        );
    }
}
