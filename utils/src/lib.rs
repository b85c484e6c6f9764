#![allow(clippy::missing_errors_doc)]

pub mod fs;

/// Truncates `name` to at most `max_chars` characters.
///
/// Truncation respects character boundaries, so multi-byte names never split.
#[must_use]
pub fn truncate_name(name: &str, max_chars: usize) -> &str {
    match name.char_indices().nth(max_chars) {
        Some((end, _)) => &name[..end],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts as diff;

    #[test]
    fn test_truncate_name() {
        diff::assert_eq!(have: super::truncate_name("vecAdd", 20), want: "vecAdd");
        diff::assert_eq!(
            have: super::truncate_name("_Z18matrixMulKernelPfS_S_i", 20),
            want: "_Z18matrixMulKernelP"
        );
        diff::assert_eq!(have: super::truncate_name("äöü", 2), want: "äö");
    }
}
