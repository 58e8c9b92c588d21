use crate::{
    error::SettingsError,
    settings::{Settings, sections::MissPolicy},
};
use connectors::file::csv::settings::SourceMode;
use std::{collections::HashMap, path::PathBuf, str::FromStr};
use tracing::debug;

pub const ENV_PREFIX: &str = "RECONCILE_";

fn lookup<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<(String, &'a str)> {
    let key = format!("{ENV_PREFIX}{name}");
    let value = vars.get(&key)?.trim();
    if value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn parse<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>, SettingsError> {
    let Some((key, value)) = lookup(vars, name) else {
        return Ok(None);
    };
    debug!(%key, "Applying environment override");
    value
        .parse()
        .map(Some)
        .map_err(|_| SettingsError::InvalidEnv {
            key,
            value: value.to_string(),
        })
}

fn set<T: FromStr>(
    target: &mut T,
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<(), SettingsError> {
    if let Some(value) = parse(vars, name)? {
        *target = value;
    }
    Ok(())
}

impl Settings {
    /// Overrides individual settings from `RECONCILE_*` variables.
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<(), SettingsError> {
        if let Some(dir) = parse::<PathBuf>(vars, "STATE_DIR")? {
            self.state.dir = Some(dir);
        }

        set(&mut self.source.batch_size, vars, "BATCH_SIZE")?;
        set(&mut self.source.header_row, vars, "HEADER_ROW")?;
        set(&mut self.source.delimiter, vars, "DELIMITER")?;
        if let Some((key, value)) = lookup(vars, "SOURCE_MODE") {
            self.source.mode = match value.to_ascii_lowercase().as_str() {
                "buffered" => SourceMode::Buffered,
                "streaming" => SourceMode::Streaming,
                _ => {
                    return Err(SettingsError::InvalidEnv {
                        key,
                        value: value.to_string(),
                    });
                }
            };
        }

        set(&mut self.dispatcher.max_concurrent, vars, "MAX_CONCURRENT")?;
        set(&mut self.dispatcher.min_spacing_ms, vars, "MIN_SPACING_MS")?;
        set(&mut self.dispatcher.max_attempts, vars, "MAX_ATTEMPTS")?;
        set(&mut self.dispatcher.base_delay_ms, vars, "BASE_DELAY_MS")?;
        set(&mut self.dispatcher.max_delay_ms, vars, "MAX_DELAY_MS")?;
        set(&mut self.dispatcher.call_timeout_secs, vars, "CALL_TIMEOUT_SECS")?;

        set(&mut self.workers.count, vars, "WORKERS")?;
        set(&mut self.workers.job_timeout_secs, vars, "JOB_TIMEOUT_SECS")?;
        set(&mut self.workers.max_job_attempts, vars, "MAX_JOB_ATTEMPTS")?;

        set(&mut self.processing.status_flush_every, vars, "STATUS_FLUSH_EVERY")?;
        set(&mut self.processing.lookup_page_size, vars, "LOOKUP_PAGE_SIZE")?;
        if let Some((key, value)) = lookup(vars, "MISS_POLICY") {
            self.processing.miss_policy = match value.to_ascii_lowercase().as_str() {
                "skipped" => MissPolicy::Skipped,
                "failed" => MissPolicy::Failed,
                _ => {
                    return Err(SettingsError::InvalidEnv {
                        key,
                        value: value.to_string(),
                    });
                }
            };
        }

        if let Some(host) = parse::<String>(vars, "STORAGE_HOST")? {
            self.diff.storage_host = Some(host);
        }
        if let Some(env) = parse::<String>(vars, "ENVIRONMENT")? {
            self.diff.environment = Some(env);
        }

        Ok(())
    }
}
