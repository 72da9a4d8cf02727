//! Section fingerprints and the aggregate panel ETag
//!
//! Each section hashes independently so a change to one plan only
//! invalidates that plan's fingerprint. The aggregate `md_version` hashes
//! the canonical JSON encoding of the whole record, so two logically-equal
//! task states share an ETag regardless of rendering whitespace or machine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::models::RawSections;

/// Per-section content hashes. Map-valued sections are keyed by entity id;
/// `BTreeMap` keeps the JSON encoding canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFingerprints {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub issues: String,
    #[serde(default)]
    pub hints: String,
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub plans: BTreeMap<String, String>,
    #[serde(default)]
    pub evrs: BTreeMap<String, String>,
}

/// 128-bit content hash of a text block, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Fingerprint every section from its raw source text.
pub fn fingerprint_sections(raw: &RawSections) -> SectionFingerprints {
    SectionFingerprints {
        title: content_hash(&raw.title),
        requirements: content_hash(&raw.requirements),
        issues: content_hash(&raw.issues),
        hints: content_hash(&raw.hints),
        logs: content_hash(&raw.logs),
        plans: raw
            .plans
            .iter()
            .map(|(id, text)| (id.clone(), content_hash(text)))
            .collect(),
        evrs: raw
            .evrs
            .iter()
            .map(|(id, text)| (id.clone(), content_hash(text)))
            .collect(),
    }
}

/// Aggregate ETag over the fingerprint record.
pub fn md_version(fingerprints: &SectionFingerprints) -> String {
    // Field order is fixed by the struct and map keys are sorted, so this
    // serialization is canonical.
    let canonical = serde_json::to_string(fingerprints).unwrap_or_default();
    content_hash(&canonical)
}
