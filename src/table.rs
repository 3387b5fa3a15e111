// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drive slots, the mapping table, and invocation parsing.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fmt;

use anyhow::{anyhow, Result};

use crate::inspect::normalize_dir;
use crate::lock::LockFile;

/// One of the 26 substitutable drive letters, `A..=Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DriveLetter(u8);

impl DriveLetter {
    /// Parse a letter, folding to upper case.
    pub fn new(value: char) -> Result<Self> {
        let upper = value.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            Ok(Self(upper as u8))
        } else {
            Err(anyhow!(
                "invalid target drive letter '{value}'; allowed drive letters are A-Z"
            ))
        }
    }

    /// Zero-based table index.
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0 - b'A')
    }

    /// The letter as an upper-case character.
    #[must_use]
    pub fn as_char(self) -> char {
        char::from(self.0)
    }
}

impl fmt::Display for DriveLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Lifecycle of a drive slot through the mapping protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No lock held yet.
    Unlocked,
    /// Source-directory lock held.
    SourceLocked,
    /// Mapping applied, not yet verified.
    Mapped,
    /// Observed mapping differs from the requested source.
    Mismatched,
    /// A stale mapping was forcibly removed; awaiting re-map.
    ForceUnmapped,
    /// Observed mapping equals the requested source.
    Verified,
    /// Terminal error state.
    Failed,
}

impl SlotState {
    /// Whether the slot acquired resources that cleanup must unwind.
    #[must_use]
    pub fn holds_resources(self) -> bool {
        matches!(
            self,
            Self::SourceLocked | Self::Mapped | Self::Mismatched | Self::ForceUnmapped | Self::Verified
        )
    }
}

/// The per-letter unit of mapping, locking, and lifecycle state.
#[derive(Debug)]
pub struct DriveSlot {
    /// Letter this slot owns.
    pub letter: DriveLetter,
    /// Requested source directory, normalized.
    pub source: String,
    /// Target last observed by enumeration, normalized.
    pub mapped: Option<String>,
    /// Held sentinel lock, if any.
    pub lock: Option<LockFile>,
    /// Current lifecycle state.
    pub state: SlotState,
}

/// Requested mappings, indexed by letter and iterated ascending.
#[derive(Debug)]
pub struct MappingTable {
    slots: [Option<DriveSlot>; 26],
}

impl MappingTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Insert or update the slot for `letter`.
    ///
    /// A repeated letter replaces the stored source outright; a letter never
    /// occupies more than one slot.
    pub fn insert(&mut self, letter: DriveLetter, source: &str) {
        let source = normalize_dir(source);
        match &mut self.slots[letter.index()] {
            Some(slot) => slot.source = source,
            entry @ None => {
                *entry = Some(DriveSlot {
                    letter,
                    source,
                    mapped: None,
                    lock: None,
                    state: SlotState::Unlocked,
                });
            }
        }
    }

    /// Slot for `letter`, if requested.
    #[must_use]
    pub fn get(&self, letter: DriveLetter) -> Option<&DriveSlot> {
        self.slots[letter.index()].as_ref()
    }

    /// Mutable slot for `letter`, if requested.
    pub fn get_mut(&mut self, letter: DriveLetter) -> Option<&mut DriveSlot> {
        self.slots[letter.index()].as_mut()
    }

    /// Requested slots in ascending letter order.
    pub fn iter(&self) -> impl Iterator<Item = &DriveSlot> {
        self.slots.iter().flatten()
    }

    /// Mutable requested slots in ascending letter order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DriveSlot> {
        self.slots.iter_mut().flatten()
    }

    /// Requested letters in ascending order.
    #[must_use]
    pub fn letters(&self) -> Vec<DriveLetter> {
        self.iter().map(|slot| slot.letter).collect()
    }

    /// Number of requested letters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no letters were requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed invocation: requested mappings plus the child command line.
#[derive(Debug)]
pub struct Invocation {
    /// Requested drive mappings.
    pub table: MappingTable,
    /// Child executable and its arguments.
    pub command: Vec<String>,
}

/// Split `args` into leading mapping tokens and the child command.
///
/// A mapping token is `<letter>=<path>`; the first token that does not match
/// that shape starts the child command line.
pub fn parse_invocation(args: &[String]) -> Result<Invocation> {
    let mut table = MappingTable::new();
    let mut command_start = args.len();
    for (position, token) in args.iter().enumerate() {
        match split_mapping_token(token) {
            Some((letter, source)) => {
                let letter = DriveLetter::new(letter)?;
                table.insert(letter, source);
            }
            None => {
                command_start = position;
                break;
            }
        }
    }
    let command: Vec<String> = args[command_start..].to_vec();
    if command.is_empty() {
        return Err(anyhow!(
            "no process was specified to run inside the substituted view"
        ));
    }
    Ok(Invocation { table, command })
}

fn split_mapping_token(token: &str) -> Option<(char, &str)> {
    let mut chars = token.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_alphabetic() {
        return None;
    }
    if chars.next()? != '=' {
        return None;
    }
    let source = &token[2..];
    if source.is_empty() {
        return None;
    }
    Some((letter, source))
}
