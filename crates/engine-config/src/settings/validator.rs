use crate::{error::SettingsError, settings::Settings};
use std::collections::HashSet;

fn invalid(field: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn at_least_one(field: &'static str, value: u64) -> Result<(), SettingsError> {
    if value == 0 {
        return Err(invalid(field, "must be at least 1"));
    }
    Ok(())
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        at_least_one("source.batch_size", self.source.batch_size as u64)?;
        if !self.source.delimiter.is_ascii() {
            return Err(invalid("source.delimiter", "must be a single ASCII character"));
        }

        at_least_one("dispatcher.max_concurrent", self.dispatcher.max_concurrent as u64)?;
        at_least_one("dispatcher.max_attempts", self.dispatcher.max_attempts as u64)?;
        at_least_one("dispatcher.call_timeout_secs", self.dispatcher.call_timeout_secs)?;
        if self.dispatcher.max_delay_ms != 0
            && self.dispatcher.max_delay_ms < self.dispatcher.base_delay_ms
        {
            return Err(invalid(
                "dispatcher.max_delay_ms",
                "must not be below base_delay_ms",
            ));
        }

        at_least_one("workers.count", self.workers.count as u64)?;
        at_least_one("workers.job_timeout_secs", self.workers.job_timeout_secs)?;
        at_least_one("workers.max_job_attempts", self.workers.max_job_attempts as u64)?;

        at_least_one(
            "processing.status_flush_every",
            self.processing.status_flush_every as u64,
        )?;
        at_least_one(
            "processing.lookup_page_size",
            self.processing.lookup_page_size as u64,
        )?;

        let mut keys = HashSet::new();
        for field in &self.diff.tracked_fields {
            if field.key.trim().is_empty() {
                return Err(invalid("diff.tracked_fields", "empty field key"));
            }
            if !keys.insert(field.key.as_str()) {
                return Err(invalid(
                    "diff.tracked_fields",
                    format!("{} is listed twice", field.key),
                ));
            }
        }

        if let Some(env) = &self.diff.environment
            && !self.diff.known_environments.iter().any(|k| k == env)
        {
            return Err(invalid(
                "diff.environment",
                format!("{env} is not one of known_environments"),
            ));
        }

        Ok(())
    }
}
