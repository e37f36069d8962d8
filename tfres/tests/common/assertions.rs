use std::path::Path;

pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "Expected to find '{needle}' in output, got: {haystack}"
    );
}

pub fn assert_path_missing(path: &Path) {
    assert!(!path.exists(), "Expected path to be gone: {}", path.display());
}
