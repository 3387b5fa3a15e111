// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drive the external-tool adapter end to end with a scripted stand-in.
// Author: Lukas Bower
#![cfg(unix)]
#![forbid(unsafe_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use substrun::policy::{RetryPolicy, RunPolicy};
use substrun::subst::SubstTool;
use substrun::substitute::execute;
use substrun::table::{DriveLetter, MappingTable};
use substrun::DriveSubst;
use substrun::LOCK_FILE_NAME;

/// Install a small shell script that mimics the substitution utility:
/// no arguments lists bindings, `/D X:` removes one, `X: <dir>` adds one.
fn install_fake_tool(dir: &Path) -> String {
    let state = dir.join("bindings.txt");
    let script = dir.join("fakesubst");
    let body = format!(
        "#!/bin/sh\n\
         STATE='{state}'\n\
         if [ \"$#\" -eq 0 ]; then\n\
         \t[ -f \"$STATE\" ] && cat \"$STATE\"\n\
         \texit 0\n\
         fi\n\
         if [ \"$1\" = \"/D\" ]; then\n\
         \tL=\"${{2%:}}\"\n\
         \tif [ -f \"$STATE\" ]; then\n\
         \t\tgrep -v \"^$L\" \"$STATE\" > \"$STATE.new\" || true\n\
         \t\tmv \"$STATE.new\" \"$STATE\"\n\
         \tfi\n\
         \texit 0\n\
         fi\n\
         L=\"${{1%:}}\"\n\
         printf '%s:/: => %s\\n' \"$L\" \"$2\" >> \"$STATE\"\n\
         exit 0\n",
        state = state.display()
    );
    fs::write(&script, body).unwrap();
    let mut perms = fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script, perms).unwrap();
    script.to_str().unwrap().to_owned()
}

fn fast_policy(program: String) -> RunPolicy {
    RunPolicy {
        verbose: false,
        subst_program: program,
        retry: RetryPolicy {
            interval_ms: 5,
            max_attempts: Some(20),
        },
    }
}

#[test]
fn maps_runs_and_unwinds_through_the_external_tool() {
    let work = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    let program = install_fake_tool(work.path());
    let tool = SubstTool::new(program.clone());
    let policy = fast_policy(program);

    let mut table = MappingTable::new();
    let x = DriveLetter::new('X').unwrap();
    table.insert(x, src.path().to_str().unwrap());
    let command = vec!["sh".to_owned(), "-c".to_owned(), "exit 5".to_owned()];

    let code = execute(&mut table, &tool, &command, &policy).unwrap();
    assert_eq!(code, 5);

    // The binding was removed again and the source lock released.
    let snapshot = tool.snapshot().unwrap();
    assert!(snapshot.get(x).is_none());
    let sentinel = src.path().join(LOCK_FILE_NAME);
    match substrun::lock::try_acquire(&sentinel).unwrap() {
        substrun::lock::TryAcquire::Acquired(lock) => lock.release(),
        substrun::lock::TryAcquire::Contended => panic!("source sentinel still held"),
    }
}

#[test]
fn adapter_round_trips_bind_list_unbind() {
    let work = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    let program = install_fake_tool(work.path());
    let tool = SubstTool::new(program);

    let y = DriveLetter::new('Y').unwrap();
    let source = format!("{}/", src.path().display());
    tool.bind(y, &source).unwrap();

    let snapshot = tool.snapshot().unwrap();
    assert_eq!(snapshot.get(y), Some(source.as_str()));

    tool.unbind(y).unwrap();
    let snapshot = tool.snapshot().unwrap();
    assert!(snapshot.get(y).is_none());
}

#[test]
fn a_tool_that_cannot_start_fails_enumeration() {
    let tool = SubstTool::new("substrun-no-such-tool");
    let err = tool.snapshot().unwrap_err();
    assert!(err.to_string().contains("enumerate"));
}
