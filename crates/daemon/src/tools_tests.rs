// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn find_on_path_locates_a_standard_tool() {
    let found = find_on_path("sh").unwrap();
    assert!(found.ends_with("sh"));
    assert!(found.is_absolute());
}

#[test]
fn find_on_path_misses_nonsense() {
    assert!(find_on_path("definitely-not-a-real-tool-8f3a").is_none());
}

#[test]
fn required_tools_name_the_imager_and_transport() {
    assert!(REQUIRED_TOOLS.contains(&"ddrescue"));
    assert!(REQUIRED_TOOLS.contains(&"rsync"));
}
