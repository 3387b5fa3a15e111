// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared trait and constants for the substrun CLI.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Coordinated drive-letter substitution: lock, map, verify, run, unwind.
//!
//! Concurrent instances of this tool agree on drive-letter ownership purely
//! through filesystem sharing semantics. Every instance locks sentinel files
//! in the same ascending-letter order, so no two instances can deadlock, and
//! a verify-and-repair loop corrects mappings left behind by crashed or
//! competing processes before the child command is started.

/// Mapped-path inspection and listing parsing.
pub mod inspect;
/// Filesystem-backed exclusive locks.
pub mod lock;
/// Retry and verbosity policy.
pub mod policy;
/// Child process launch and working-directory remap.
pub mod run;
/// External substitution tool adapter.
pub mod subst;
/// Two-phase mapping state machine and cleanup.
pub mod substitute;
/// Drive slots and the mapping table.
pub mod table;

use std::path::PathBuf;

use anyhow::Result;

use crate::inspect::MappingSnapshot;
use crate::table::DriveLetter;

/// Sentinel file name used for both source-directory and drive-root locks.
pub const LOCK_FILE_NAME: &str = ".substrun.lock";

/// Operations against the OS drive-substitution facility.
///
/// The state machine and launcher are written against this trait; the real
/// implementation shells out to the external substitution utility, tests
/// substitute an in-memory fake.
pub trait DriveSubst {
    /// Bind `letter` to the `source` directory.
    ///
    /// The call's own outcome is advisory only; correctness is judged by
    /// re-enumeration. An error means the facility could not be invoked at
    /// all.
    fn bind(&self, letter: DriveLetter, source: &str) -> Result<()>;

    /// Remove whatever `letter` is currently bound to, regardless of owner.
    fn unbind(&self, letter: DriveLetter) -> Result<()>;

    /// Enumerate current bindings as a normalized snapshot.
    fn snapshot(&self) -> Result<MappingSnapshot>;

    /// Root path of the substituted drive (`X:\` for the real facility).
    fn drive_root(&self, letter: DriveLetter) -> PathBuf;
}
