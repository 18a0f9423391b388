// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn id_splits_into_namespace_and_name() {
    let id = SandboxId::from_parts("default", "sbx-a1b2");
    assert_eq!(id.as_str(), "default/sbx-a1b2");
    assert_eq!(id.namespace(), "default");
    assert_eq!(id.name(), "sbx-a1b2");
}

#[test]
fn id_without_separator_has_empty_namespace() {
    let id = SandboxId::from_string("just-a-name");
    assert_eq!(id.namespace(), "");
    assert_eq!(id.name(), "just-a-name");
}

#[test]
fn id_serializes_transparently() {
    let id = SandboxId::from_parts("ns", "n");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"ns/n\"");
    let back: SandboxId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn lock_tokens_are_unique_and_opaque() {
    let a = generate_lock_token();
    let b = generate_lock_token();
    assert_ne!(a, b);
    assert_eq!(a.len(), 21);
}

#[test]
fn name_suffix_is_store_safe() {
    let s = generate_name_suffix();
    assert_eq!(s.len(), 8);
    assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
}
