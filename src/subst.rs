// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shell out to the OS drive-substitution utility.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::{PathBuf, MAIN_SEPARATOR};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use log::debug;

use crate::inspect::{parse_listing, MappingSnapshot};
use crate::table::DriveLetter;
use crate::DriveSubst;

/// Adapter that shells out to the external substitution utility.
#[derive(Debug, Clone)]
pub struct SubstTool {
    program: String,
}

impl SubstTool {
    /// Adapter invoking `program` (normally `subst`).
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn drive_spec(letter: DriveLetter) -> String {
        format!("{letter}:")
    }
}

impl DriveSubst for SubstTool {
    fn bind(&self, letter: DriveLetter, source: &str) -> Result<()> {
        // The utility rejects a trailing separator on the source argument.
        let source = source.trim_end_matches(MAIN_SEPARATOR);
        let status = Command::new(&self.program)
            .arg(Self::drive_spec(letter))
            .arg(source)
            .status()
            .with_context(|| format!("invoke {} to bind drive {letter}:", self.program))?;
        if !status.success() {
            // Not authoritative; the re-enumeration pass decides.
            debug!("{} bind of drive {letter}: exited with {status}", self.program);
        }
        Ok(())
    }

    fn unbind(&self, letter: DriveLetter) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("/D")
            .arg(Self::drive_spec(letter))
            .status()
            .with_context(|| format!("invoke {} to unbind drive {letter}:", self.program))?;
        if !status.success() {
            debug!(
                "{} unbind of drive {letter}: exited with {status}",
                self.program
            );
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<MappingSnapshot> {
        let output = Command::new(&self.program)
            .output()
            .with_context(|| format!("invoke {} to enumerate mappings", self.program))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} enumeration exited with {}",
                self.program,
                output.status
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_listing(&text)
    }

    fn drive_root(&self, letter: DriveLetter) -> PathBuf {
        PathBuf::from(format!("{letter}:{MAIN_SEPARATOR}"))
    }
}
