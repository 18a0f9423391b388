// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log hygiene: keep operator-facing messages single-line.

/// Replace control characters (newlines included) with spaces so the
/// value stays on one log line. Non-control text passes through as-is.
pub fn scrub(s: &str) -> String {
    s.chars().map(|c| if c.is_control() { ' ' } else { c }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_newlines_and_tabs() {
        assert_eq!(scrub("conflict:\n\tretry"), "conflict:  retry");
    }

    #[test]
    fn passes_plain_text_through() {
        let msg = "no available sandbox in pool default/small";
        assert_eq!(scrub(msg), msg);
    }
}
