// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Launch the child command inside the substituted view.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use log::debug;

use crate::inspect::normalize_dir;
use crate::table::{MappingTable, SlotState};
use crate::DriveSubst;

/// Render a single display line for the child command, quoting any argument
/// containing whitespace. Used for diagnostics; the actual spawn passes the
/// argument vector through unchanged.
#[must_use]
pub fn render_command_line(command: &[String]) -> String {
    let mut line = String::new();
    for (index, arg) in command.iter().enumerate() {
        if index > 0 {
            line.push(' ');
        }
        if arg.chars().any(char::is_whitespace) {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Pick the working directory for the child: the current directory rewritten
/// onto the most specific verified mapping.
///
/// Among verified slots, scanned ascending, the slot whose source is the
/// strictly longest prefix of the current directory wins; a later
/// equal-length match does not override an earlier one. With no matching
/// source the original directory is used unchanged.
#[must_use]
pub fn remap_working_dir<S: DriveSubst>(
    table: &MappingTable,
    subst: &S,
    current: &Path,
) -> PathBuf {
    let normalized = normalize_dir(&current.to_string_lossy());
    let mut best_len = 0usize;
    let mut remapped: Option<PathBuf> = None;
    for slot in table.iter() {
        if slot.state != SlotState::Verified {
            continue;
        }
        if !normalized.starts_with(&slot.source) {
            continue;
        }
        if slot.source.len() > best_len {
            best_len = slot.source.len();
            let suffix = &normalized[slot.source.len()..];
            remapped = Some(subst.drive_root(slot.letter).join(suffix));
        }
    }
    remapped.unwrap_or_else(|| current.to_path_buf())
}

/// Launch the child command synchronously and return its exit code.
///
/// The command runs with its working directory remapped onto the best
/// matching substituted drive. Failure to create the process or to observe
/// its exit code is fatal.
pub fn launch<S: DriveSubst>(
    table: &MappingTable,
    subst: &S,
    command: &[String],
) -> Result<i32> {
    let (program, args) = command.split_first().ok_or_else(|| {
        anyhow!("no process was specified to run inside the substituted view")
    })?;
    let current = env::current_dir().context("could not get current directory")?;
    let workdir = remap_working_dir(table, subst, &current);
    debug!(
        "starting {} in {}",
        render_command_line(command),
        workdir.display()
    );

    let mut child = Command::new(program)
        .args(args)
        .current_dir(&workdir)
        .spawn()
        .with_context(|| format!("failed creating process {program}"))?;
    let status = child
        .wait()
        .with_context(|| format!("failed waiting for process {program}"))?;
    status
        .code()
        .ok_or_else(|| anyhow!("process {program} exit code could not be obtained"))
}
