// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: In-memory substitution facility for integration tests.
// Author: Lukas Bower
#![forbid(unsafe_code)]
// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use substrun::inspect::{normalize_dir, MappingSnapshot};
use substrun::table::DriveLetter;
use substrun::DriveSubst;

/// In-memory stand-in for the OS substitution facility.
///
/// Bindings live in a table guarded by a mutex so competing "instances" on
/// different threads observe each other, and `drive_root` resolves through
/// the current binding the way a substituted drive root does on the real
/// facility — which is what makes a drive-root lock collide with the
/// owner's source-directory lock.
pub struct FakeSubst {
    roots: PathBuf,
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    bindings: BTreeMap<char, String>,
    ops: Vec<String>,
    fail_enumeration: bool,
}

impl FakeSubst {
    /// Facility whose unbound drive roots live under `roots`.
    pub fn new(roots: &Path) -> Self {
        for value in b'A'..=b'Z' {
            let _ = fs::create_dir_all(roots.join(char::from(value).to_string()));
        }
        Self {
            roots: roots.to_path_buf(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Pre-seed a binding left behind by some other (possibly dead) process.
    pub fn seed_binding(&self, letter: DriveLetter, target: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .bindings
            .insert(letter.as_char(), normalize_dir(target));
    }

    /// Make every later enumeration fail.
    pub fn fail_enumeration(&self) {
        self.state.lock().unwrap().fail_enumeration = true;
    }

    /// Current binding for `letter`, if any.
    pub fn bound(&self, letter: DriveLetter) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .bindings
            .get(&letter.as_char())
            .cloned()
    }

    /// Recorded bind/unbind operations, in order.
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }
}

impl DriveSubst for FakeSubst {
    fn bind(&self, letter: DriveLetter, source: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(format!("bind {letter} {source}"));
        // The real facility refuses to re-map an occupied letter; callers
        // must unbind first.
        state
            .bindings
            .entry(letter.as_char())
            .or_insert_with(|| source.to_owned());
        Ok(())
    }

    fn unbind(&self, letter: DriveLetter) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(format!("unbind {letter}"));
        state.bindings.remove(&letter.as_char());
        Ok(())
    }

    fn snapshot(&self) -> Result<MappingSnapshot> {
        let state = self.state.lock().unwrap();
        if state.fail_enumeration {
            return Err(anyhow!("enumeration backend failure"));
        }
        let mut snapshot = MappingSnapshot::new();
        for (letter, target) in &state.bindings {
            let letter = DriveLetter::new(*letter).expect("seeded letters are valid");
            snapshot.set(letter, target.clone());
        }
        Ok(snapshot)
    }

    fn drive_root(&self, letter: DriveLetter) -> PathBuf {
        let state = self.state.lock().unwrap();
        match state.bindings.get(&letter.as_char()) {
            Some(target) => PathBuf::from(target),
            None => self.roots.join(letter.as_char().to_string()),
        }
    }
}
