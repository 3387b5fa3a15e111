// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Two-phase drive-mapping state machine and unwind.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, warn};

use crate::inspect::MappingSnapshot;
use crate::lock::{try_acquire, LockManager, TryAcquire};
use crate::policy::{RetryPolicy, RunPolicy};
use crate::run;
use crate::table::{DriveLetter, MappingTable, SlotState};
use crate::{DriveSubst, LOCK_FILE_NAME};

/// Drives the two-phase substitution protocol over a mapping table.
///
/// Both phases visit letters in ascending order. Every concurrent instance
/// applies the same order, so no instance ever waits on a letter while
/// holding a higher one, and the protocol cannot deadlock.
pub struct Coordinator<'a, S: DriveSubst> {
    subst: &'a S,
    locks: LockManager,
    retry: RetryPolicy,
}

impl<'a, S: DriveSubst> Coordinator<'a, S> {
    /// Coordinator over `subst` applying `retry` on contention.
    #[must_use]
    pub fn new(subst: &'a S, retry: RetryPolicy) -> Self {
        Self {
            subst,
            locks: LockManager::new(retry),
            retry,
        }
    }

    /// Phase 1: validate every source and take every source lock, ascending.
    ///
    /// All source locks are held before any mapping is applied. A source
    /// that is missing or not a directory aborts the whole run before any
    /// lock is attempted for that letter.
    pub fn lock_sources(&self, table: &mut MappingTable) -> Result<()> {
        for letter in table.letters() {
            let Some(slot) = table.get_mut(letter) else {
                continue;
            };
            let source_path = Path::new(&slot.source);
            if !source_path.exists() {
                slot.state = SlotState::Failed;
                return Err(anyhow!(
                    "invalid source for drive {letter}:: the location {} does not exist",
                    slot.source
                ));
            }
            if !source_path.is_dir() {
                slot.state = SlotState::Failed;
                return Err(anyhow!(
                    "invalid source for drive {letter}:: the location {} is not a directory",
                    slot.source
                ));
            }
            let sentinel = source_path.join(LOCK_FILE_NAME);
            let mut lock = self
                .locks
                .acquire(&sentinel)
                .with_context(|| format!("locking source directory for drive {letter}:"))?;
            lock.log(&format!(
                "substituting drive {letter}: for path {}",
                slot.source
            ));
            slot.lock = Some(lock);
            slot.state = SlotState::SourceLocked;
            debug!("source lock held for drive {letter}: at {}", sentinel.display());
        }
        Ok(())
    }

    /// Phase 2: map every locked letter and repair until verified, ascending.
    pub fn map_all(&self, table: &mut MappingTable) -> Result<()> {
        for letter in table.letters() {
            self.map_one(table, letter)?;
        }
        Ok(())
    }

    /// Map a single letter, looping through verify and repair until its
    /// observed target equals the requested source.
    fn map_one(&self, table: &mut MappingTable, letter: DriveLetter) -> Result<()> {
        let Some(source) = table.get(letter).map(|slot| slot.source.clone()) else {
            return Ok(());
        };
        let mut rounds = 0u32;
        loop {
            rounds = rounds.saturating_add(1);
            if let Some(max) = self.retry.max_attempts {
                if rounds > max {
                    return Err(anyhow!(
                        "drive {letter}: could not be verified after {max} attempts"
                    ));
                }
            }

            self.subst.bind(letter, &source)?;
            if let Some(slot) = table.get_mut(letter) {
                slot.state = SlotState::Mapped;
            }

            let snapshot = self
                .subst
                .snapshot()
                .context("enumerate current drive mappings")?;
            record_snapshot(table, &snapshot);

            let observed = table.get(letter).and_then(|slot| slot.mapped.clone());
            if observed.as_deref() == Some(source.as_str()) {
                if let Some(slot) = table.get_mut(letter) {
                    slot.state = SlotState::Verified;
                }
                debug!("drive {letter}: verified against {source}");
                return Ok(());
            }
            if let Some(slot) = table.get_mut(letter) {
                slot.state = SlotState::Mismatched;
            }

            let root = self.subst.drive_root(letter);
            let sentinel = root.join(LOCK_FILE_NAME);
            match try_acquire(&sentinel) {
                Ok(TryAcquire::Contended) => {
                    // Another live process owns the letter; wait it out and
                    // map again.
                    warn!(
                        "lock file {} is in use by another process; waiting {} ms",
                        sentinel.display(),
                        self.retry.interval_ms
                    );
                    std::thread::sleep(self.retry.interval());
                }
                Ok(TryAcquire::Acquired(root_lock)) => {
                    // Holding the root lock pins the letter; judge the
                    // mapping against a fresh enumeration.
                    let snapshot = self
                        .subst
                        .snapshot()
                        .context("enumerate current drive mappings")?;
                    record_snapshot(table, &snapshot);
                    let observed = table.get(letter).and_then(|slot| slot.mapped.clone());
                    if observed.as_deref() == Some(source.as_str()) {
                        // Raced into agreement; the next round re-verifies
                        // and terminates.
                        root_lock.release();
                    } else {
                        // Nobody holds the root lock yet the target differs:
                        // a stale mapping from a dead process. Remove it and
                        // map again.
                        warn!(
                            "drive {letter}: is bound to {} instead of {source}; forcing a release",
                            observed.as_deref().unwrap_or("nothing")
                        );
                        if let Some(slot) = table.get_mut(letter) {
                            slot.state = SlotState::ForceUnmapped;
                        }
                        self.subst.unbind(letter)?;
                        root_lock.release();
                    }
                }
                Err(err) => {
                    // The substitution facility and the lock protocol can
                    // disagree transiently. A root that is not a directory
                    // means the mapping is effectively gone; clear it and
                    // map again.
                    if !root.is_dir() {
                        warn!(
                            "drive {letter}: does not seem to be using the sharing protocol; forcing a release"
                        );
                        if let Some(slot) = table.get_mut(letter) {
                            slot.state = SlotState::ForceUnmapped;
                        }
                        self.subst.unbind(letter)?;
                    } else {
                        return Err(err)
                            .with_context(|| format!("locking drive root for drive {letter}:"));
                    }
                }
            }
        }
    }

    /// Unwind every slot that acquired resources, ascending.
    ///
    /// Best-effort: unbind and release failures are logged, never
    /// propagated, so the exit code already computed from the child is
    /// preserved.
    pub fn cleanup(&self, table: &mut MappingTable) {
        for letter in table.letters() {
            let Some(slot) = table.get_mut(letter) else {
                continue;
            };
            if !slot.state.holds_resources() {
                continue;
            }
            let lock = slot.lock.take();
            let source = slot.source.clone();
            match lock {
                Some(mut lock) => {
                    lock.log(&format!("done; releasing drive {letter}: - {source}"));
                    if let Err(err) = self.subst.unbind(letter) {
                        warn!("failed to release drive {letter}: {err:#}");
                    }
                    lock.release();
                }
                None => {
                    error!(
                        "invalid state: lock handle missing for drive {letter}: ({source})"
                    );
                    if let Err(err) = self.subst.unbind(letter) {
                        warn!("failed to release drive {letter}: {err:#}");
                    }
                }
            }
            if let Some(slot) = table.get_mut(letter) {
                slot.state = SlotState::Unlocked;
                slot.mapped = None;
            }
        }
    }
}

/// Record the observed target for every requested slot.
fn record_snapshot(table: &mut MappingTable, snapshot: &MappingSnapshot) {
    for slot in table.iter_mut() {
        slot.mapped = snapshot.get(slot.letter).map(str::to_owned);
    }
}

/// Lock, map, and verify every requested letter, run the child command, and
/// always unwind afterward.
///
/// Returns the child's exit code; every fatal failure surfaces as an error
/// after the unwind has run.
pub fn execute<S: DriveSubst>(
    table: &mut MappingTable,
    subst: &S,
    command: &[String],
    policy: &RunPolicy,
) -> Result<i32> {
    let coordinator = Coordinator::new(subst, policy.retry);
    let outcome = prepare_and_launch(&coordinator, table, subst, command);
    coordinator.cleanup(table);
    outcome
}

fn prepare_and_launch<S: DriveSubst>(
    coordinator: &Coordinator<'_, S>,
    table: &mut MappingTable,
    subst: &S,
    command: &[String],
) -> Result<i32> {
    coordinator.lock_sources(table)?;
    coordinator.map_all(table)?;
    run::launch(table, subst, command)
}
