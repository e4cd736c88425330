use crate::errors::{SchedulerError, SchedulerResult};

/// Validation hook implemented by every configuration model.
pub trait ConfigValidator {
    fn validate(&self) -> SchedulerResult<()>;
}

/// Shared validation helpers for configuration models.
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field: &str) -> SchedulerResult<()> {
        if value.trim().is_empty() {
            return Err(SchedulerError::Configuration(format!(
                "{field} must not be empty"
            )));
        }
        Ok(())
    }

    pub fn validate_positive(value: u64, field: &str) -> SchedulerResult<()> {
        if value == 0 {
            return Err(SchedulerError::Configuration(format!(
                "{field} must be greater than 0"
            )));
        }
        Ok(())
    }

    pub fn validate_url_scheme(value: &str, schemes: &[&str], field: &str) -> SchedulerResult<()> {
        if !schemes.iter().any(|s| value.starts_with(s)) {
            return Err(SchedulerError::Configuration(format!(
                "{field} must start with one of: {}",
                schemes.join(", ")
            )));
        }
        Ok(())
    }
}
