//! Assertion helpers for workspace state.
//!
//! Failures print the offending path and a line diff rather than raw
//! byte vectors.

use crate::fixtures::read_tree;
use std::path::Path;

/// Assert that a file's content equals expected text exactly.
pub fn assert_file_equals(path: &Path, expected: &str) {
    let content = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));

    if content != expected {
        panic!(
            "File {} content does not match expected.\n{}",
            path.display(),
            line_diff(expected, &content)
        );
    }
}

/// Assert that a file does not exist.
pub fn assert_file_absent(path: &Path) {
    assert!(
        !path.exists(),
        "File {} exists but should have been removed",
        path.display()
    );
}

/// Assert that two directory trees hold the same files with the same
/// bytes (waypoint data directories are ignored).
pub fn assert_trees_equal(actual: &Path, expected: &Path) {
    let actual_tree = read_tree(actual);
    let expected_tree = read_tree(expected);

    let actual_names: Vec<_> = actual_tree.keys().collect();
    let expected_names: Vec<_> = expected_tree.keys().collect();
    assert_eq!(
        actual_names, expected_names,
        "File sets differ between {} and {}",
        actual.display(),
        expected.display()
    );

    for (name, bytes) in &expected_tree {
        if actual_tree.get(name) != Some(bytes) {
            panic!(
                "{} differs.\n{}",
                name,
                line_diff(
                    &String::from_utf8_lossy(bytes),
                    &String::from_utf8_lossy(&actual_tree[name])
                )
            );
        }
    }
}

/// Assert that two strings are equal, with a diff on failure.
pub fn assert_strings_equal(actual: &str, expected: &str) {
    if actual != expected {
        panic!("Strings are not equal.\nDiff:\n{}", line_diff(expected, actual));
    }
}

fn line_diff(expected: &str, actual: &str) -> String {
    let diff = similar::TextDiff::from_lines(expected, actual);
    let mut output = String::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            similar::ChangeTag::Delete => "-",
            similar::ChangeTag::Insert => "+",
            similar::ChangeTag::Equal => " ",
        };
        output.push_str(&format!("{}{}", sign, change));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestProject;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_assert_file_equals_and_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.txt");
        fs::write(&path, "Hello, world!").unwrap();

        assert_file_equals(&path, "Hello, world!");
        assert_file_absent(&dir.path().join("missing.txt"));
    }

    #[test]
    #[should_panic(expected = "differs")]
    fn test_assert_trees_equal_reports_changed_file() {
        let a = TestProject::new().with_file("x.txt", "1").build();
        let b = TestProject::new().with_file("x.txt", "2").build();
        assert_trees_equal(a.path(), b.path());
    }

    #[test]
    fn test_assert_trees_equal_ignores_data_dir() {
        let a = TestProject::new()
            .with_file("x.txt", "1")
            .with_file(".waypoint/indexes/snapshots.json", "{}")
            .build();
        let b = TestProject::new().with_file("x.txt", "1").build();
        assert_trees_equal(a.path(), b.path());
    }

    #[test]
    fn test_assert_strings_equal() {
        assert_strings_equal("hello\n", "hello\n");
    }
}
