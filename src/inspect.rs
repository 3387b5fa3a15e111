// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parse and normalize drive-substitution enumeration output.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::MAIN_SEPARATOR;

use anyhow::{anyhow, Result};

use crate::table::DriveLetter;

/// Byte offset of the target within an enumeration record (`X:\: => `).
const TARGET_OFFSET: usize = 8;

/// Device-namespace prefix some facilities report on targets.
const DEVICE_PREFIX: &str = "\\??\\";

/// Sparse snapshot of observed letter bindings, targets normalized.
#[derive(Debug)]
pub struct MappingSnapshot {
    targets: [Option<String>; 26],
}

impl MappingSnapshot {
    /// Empty snapshot with no observed bindings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            targets: std::array::from_fn(|_| None),
        }
    }

    /// Observed target for `letter`, if the facility reported one.
    #[must_use]
    pub fn get(&self, letter: DriveLetter) -> Option<&str> {
        self.targets[letter.index()].as_deref()
    }

    /// Record the normalized target observed for `letter`.
    pub fn set(&mut self, letter: DriveLetter, target: String) {
        self.targets[letter.index()] = Some(target);
    }
}

impl Default for MappingSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical form of a directory path: exactly one trailing separator, and
/// case-folded where the filesystem is case-insensitive.
#[must_use]
pub fn normalize_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches(|c: char| c.is_control());
    let mut normalized = if cfg!(windows) {
        trimmed.to_lowercase()
    } else {
        trimmed.to_owned()
    };
    while normalized.ends_with(MAIN_SEPARATOR) {
        normalized.pop();
    }
    normalized.push(MAIN_SEPARATOR);
    normalized
}

/// Parse the enumeration output of the substitution facility.
///
/// Records look like `X:\: => C:\some\dir`, one per line, with the target
/// starting at a fixed byte offset. Lines shorter than a record are skipped;
/// a record naming a letter outside `A..=Z` fails the whole enumeration.
pub fn parse_listing(text: &str) -> Result<MappingSnapshot> {
    let mut snapshot = MappingSnapshot::new();
    for line in text.lines() {
        let line = line.trim_end_matches(|c: char| c.is_control());
        let Some(raw_target) = line.get(TARGET_OFFSET..) else {
            continue;
        };
        if raw_target.is_empty() {
            continue;
        }
        let Some(first) = line.chars().next() else {
            continue;
        };
        let letter = DriveLetter::new(first)
            .map_err(|_| anyhow!("enumeration reported invalid drive letter '{first}'"))?;
        let target = raw_target
            .strip_prefix(DEVICE_PREFIX)
            .unwrap_or(raw_target);
        snapshot.set(letter, normalize_dir(target));
    }
    Ok(snapshot)
}
