use std::process::{Command, Output};

use pretty_assertions::assert_eq;

use irmut::config::TIMEOUT_EXIT;

// Fork trees need their own process: these tests drive the built
// binary. Each child runs to completion before its sibling starts, so
// the combined stdout is deterministic.

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn catalog_path(test: &str) -> String {
    let dir = format!("{}/target/test_outputs", env!("CARGO_MANIFEST_DIR"));
    std::fs::create_dir_all(&dir).expect("test output dir");
    format!("{}/{}.mutations.txt", dir, test)
}

fn run_bin(test: &str, args: &[&str]) -> Output {
    let catalog = catalog_path(test);

    Command::new(env!("CARGO_BIN_EXE_irmut"))
        .arg("--mutation-file")
        .arg(&catalog)
        .args(args)
        .output()
        .expect("failed to spawn irmut")
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8(output.stderr.clone()).unwrap()
}

#[test]
fn fork_tree_explores_every_equivalence_class() {
    // store-site children (6 -> 5, 7, 0, 1, -1), then add-site children
    // (sub/urem/srem collapse into one class printing 0, mul prints 36,
    // udiv/sdiv share 1), then the STD child (silent), then the root.
    let out = run_bin("fork_add", &[&fixture("fork_add.ir")]);

    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "10\n14\n0\n2\n-2\n0\n36\n1\n12\n");
}

#[test]
fn equivalent_mutants_share_one_child() {
    // true value-grouping: the nine add-site candidates at 6 + 6 fall
    // into four classes, so only three children fork there. The
    // degraded one-class-per-mutant form would print six lines instead
    // of three between the store children and the root.
    let out = run_bin("fork_add_classes", &[&fixture("fork_add.ir")]);
    let text = stdout(&out);
    let add_site_lines: Vec<&str> = text.lines().skip(5).collect();

    assert_eq!(add_site_lines, vec!["0", "36", "1", "12"]);
}

#[test]
fn std_child_skips_the_call_and_parent_keeps_it() {
    let out = run_bin("std_call", &[&fixture("std_call.ir")]);

    assert_eq!(out.status.code(), Some(0));
    // child deleting the @log call, child deleting the print inside
    // @log, the root's 7, the root's trailing 1 (the print-deleting
    // child is silent)
    assert_eq!(stdout(&out), "1\n1\n7\n1\n");
}

#[test]
fn store_children_observe_their_constants() {
    let out = run_bin("store_global", &[&fixture("store_global.ir")]);

    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "41\n43\n0\n1\n-1\n42\n");
}

#[test]
fn runaway_mutant_exits_with_the_timeout_code() {
    // id 11 turns the loop's `i + 1` into `i - 1`
    let out = run_bin(
        "timeout_single",
        &["--mutant", "11", &fixture("timeout_loop.ir")],
    );

    assert_eq!(out.status.code(), Some(TIMEOUT_EXIT));
    assert!(stderr(&out).contains("MUTANT TIMEOUT"));
    assert_eq!(stdout(&out), "");
}

#[test]
fn parent_reaps_timed_out_children_and_continues() {
    let out = run_bin("timeout_tree", &[&fixture("timeout_loop.ir")]);

    assert_eq!(out.status.code(), Some(0));
    assert!(stderr(&out).contains("MUTANT TIMEOUT"));

    // every terminating lineage prints the final 9; the two
    // non-terminating classes die on the timer and print nothing
    assert_eq!(stdout(&out), "9\n".repeat(8));
}

#[test]
fn single_mutant_run_is_fork_free_and_exits_cleanly() {
    let out = run_bin("single_clean", &["--mutant", "6", &fixture("fork_add.ir")]);

    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "0\n");
}

#[test]
fn original_run_needs_no_catalog() {
    let out = Command::new(env!("CARGO_BIN_EXE_irmut"))
        .arg("--original")
        .arg(fixture("fork_add.ir"))
        .output()
        .expect("failed to spawn irmut");

    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "12\n");
}
