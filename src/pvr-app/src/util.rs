// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

/// Normalize a backend or profile name to lowercase alphanumeric, so
/// `"BBC1"`, `"bbc-1"` and `"bbc_1"` all resolve the same lookup.
pub fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("BBC-1"), "bbc1");
        assert_eq!(normalize_name("Dummy Device"), "dummydevice");
        assert_eq!(normalize_name("foo_bar-baz"), "foobarbaz");
    }
}
