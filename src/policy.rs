// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Retry and verbosity policy for substrun.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Retry scheduling for lock contention and mapping repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts in milliseconds.
    pub interval_ms: u64,
    /// Maximum attempts before failing; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Default wait between contended attempts.
    pub const DEFAULT_INTERVAL_MS: u64 = 5_000;

    /// The configured interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_ms: Self::DEFAULT_INTERVAL_MS,
            max_attempts: None,
        }
    }
}

/// Runtime configuration threaded from `main` into the components.
///
/// Verbosity has no effect on control flow; it only widens diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPolicy {
    /// Emit verbose diagnostics.
    pub verbose: bool,
    /// Program invoked for bind/unbind/enumerate operations.
    pub subst_program: String,
    /// Retry scheduling for locks and repair rounds.
    pub retry: RetryPolicy,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            verbose: false,
            subst_program: "subst".to_owned(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Build the effective policy from defaults, environment, and CLI flags.
///
/// CLI flags win over the environment, the environment over defaults.
pub fn resolve_policy(verbose_flag: bool) -> Result<RunPolicy> {
    let mut policy = RunPolicy::default();
    policy.verbose = verbose_flag || env_flag("SUBSTRUN_VERBOSE");
    if let Some(program) = env_string("SUBSTRUN_TOOL") {
        policy.subst_program = program;
    }
    if let Some(interval) = parse_env_number::<u64>("SUBSTRUN_RETRY_MS")? {
        if interval == 0 {
            return Err(anyhow!("SUBSTRUN_RETRY_MS must be >= 1"));
        }
        policy.retry.interval_ms = interval;
    }
    if let Some(attempts) = parse_env_number::<u32>("SUBSTRUN_MAX_ATTEMPTS")? {
        if attempts == 0 {
            return Err(anyhow!("SUBSTRUN_MAX_ATTEMPTS must be >= 1"));
        }
        policy.retry.max_attempts = Some(attempts);
    }
    Ok(policy)
}

fn env_flag(key: &str) -> bool {
    matches!(env::var(key), Ok(value) if value.trim() == "1")
}

fn env_string(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(_) => None,
    }
}

fn parse_env_number<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                trimmed
                    .parse::<T>()
                    .map(Some)
                    .map_err(|err| anyhow!("invalid {key} value '{trimmed}': {err}"))
            }
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!("failed to read {key}: {err}")),
    }
}
