//! Accumulating, de-duplicating merge of fetched bundles.
//!
//! Bundles fetched from the same server (paged results, a primary query plus a supplemental
//! query) often overlap. [`BundleMerger`] appends each entry once, first-seen-wins, and never
//! removes anything it has already accepted.
//!
//! An incoming entry is a duplicate when:
//! - its relative reference equals that of an accepted entry, or
//! - any of its identifiers [`matches`](crate::Identifier::matches) an accepted entry's
//!   identifier, or
//! - it is structurally identical to an accepted entry (entries with neither id nor identifier).

use crate::bundle::{Bundle, BundleEntry, BundleType};
use std::collections::HashSet;

#[derive(Clone, Debug)]
pub struct BundleMerger {
    bundle: Bundle,
    references: HashSet<String>,
}

impl Default for BundleMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleMerger {
    pub fn new() -> Self {
        Self {
            bundle: Bundle::new(BundleType::Collection),
            references: HashSet::new(),
        }
    }

    /// Merge `bundle` into the accumulated result. Returns the number of entries appended.
    pub fn consume(&mut self, bundle: &Bundle) -> usize {
        let mut appended = 0;
        for entry in &bundle.entry {
            if entry.resource.is_none() || self.is_duplicate(entry) {
                continue;
            }
            if let Some(reference) = entry.relative_reference() {
                self.references.insert(reference);
            }
            self.bundle.entry.push(entry.clone());
            appended += 1;
        }
        appended
    }

    pub fn merged(&self) -> &Bundle {
        &self.bundle
    }

    pub fn into_merged(self) -> Bundle {
        self.bundle
    }

    pub fn len(&self) -> usize {
        self.bundle.entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundle.entry.is_empty()
    }

    fn is_duplicate(&self, candidate: &BundleEntry) -> bool {
        if let Some(reference) = candidate.relative_reference() {
            if self.references.contains(&reference) {
                return true;
            }
        }

        let identifiers = candidate
            .resource
            .as_ref()
            .map(|r| r.identifiers())
            .unwrap_or_default();

        self.bundle.entry.iter().any(|existing| {
            let identifier_match = existing
                .resource
                .as_ref()
                .map(|r| r.identifiers())
                .unwrap_or_default()
                .iter()
                .any(|known| identifiers.iter().any(|id| id.matches(known)));
            identifier_match || existing == candidate
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Identifier, IdentifierUse};
    use crate::observation::Observation;
    use crate::resource::Resource;

    fn obs(id: Option<&str>, identifiers: Vec<Identifier>) -> Resource {
        Resource::Observation(Observation {
            id: id.map(str::to_string),
            identifier: identifiers,
            status: Some("final".into()),
            ..Default::default()
        })
    }

    fn bundle_of(entries: Vec<BundleEntry>) -> Bundle {
        let mut bundle = Bundle::new(BundleType::Searchset);
        bundle.entry = entries;
        bundle
    }

    #[test]
    fn consuming_the_same_bundle_twice_is_idempotent() {
        let bundle = bundle_of(vec![
            BundleEntry::new(obs(Some("a"), vec![])),
            BundleEntry::new(obs(Some("b"), vec![])),
            BundleEntry::new(obs(None, vec![])),
        ]);

        let mut merger = BundleMerger::new();
        assert_eq!(merger.consume(&bundle), 3);
        let once = merger.merged().clone();

        assert_eq!(merger.consume(&bundle), 0);
        assert_eq!(merger.merged(), &once);
    }

    #[test]
    fn reference_spellings_are_normalised_before_comparison() {
        let first = BundleEntry {
            full_url: Some("https://fhir.example.org/r4/Observation/x1".into()),
            resource: Some(obs(None, vec![])),
            ..Default::default()
        };
        let second_resource = Observation {
            status: Some("amended".into()),
            ..Default::default()
        };
        let second = BundleEntry {
            full_url: Some("https://other.example.org/Observation/x1/_history/7".into()),
            resource: Some(Resource::Observation(second_resource)),
            ..Default::default()
        };

        let mut merger = BundleMerger::new();
        merger.consume(&bundle_of(vec![first]));
        assert_eq!(merger.consume(&bundle_of(vec![second])), 0);
        assert_eq!(merger.len(), 1);
    }

    #[test]
    fn first_seen_wins_on_shared_identifier() {
        let shared = Identifier::new("urn:lab", "42").with_use(IdentifierUse::Usual);
        let official = Identifier::new("urn:lab", "42").with_use(IdentifierUse::Official);

        let mut merger = BundleMerger::new();
        merger.consume(&bundle_of(vec![BundleEntry::new(obs(Some("first"), vec![shared]))]));
        let appended =
            merger.consume(&bundle_of(vec![BundleEntry::new(obs(Some("second"), vec![official]))]));

        assert_eq!(appended, 0);
        assert_eq!(merger.merged().entry[0].resource.as_ref().unwrap().id(), Some("first"));
    }

    #[test]
    fn incompatible_identifier_uses_are_distinct() {
        let temp = Identifier::new("urn:lab", "42").with_use(IdentifierUse::Temp);
        let usual = Identifier::new("urn:lab", "42").with_use(IdentifierUse::Usual);

        let mut merger = BundleMerger::new();
        merger.consume(&bundle_of(vec![BundleEntry::new(obs(Some("a"), vec![temp]))]));
        merger.consume(&bundle_of(vec![BundleEntry::new(obs(Some("b"), vec![usual]))]));
        assert_eq!(merger.len(), 2);
    }

    #[test]
    fn entries_without_resources_are_skipped() {
        let mut merger = BundleMerger::default();
        let appended = merger.consume(&bundle_of(vec![BundleEntry::default()]));
        assert_eq!(appended, 0);
        assert!(merger.is_empty());
    }

    #[test]
    fn merge_accumulates_in_first_seen_order() {
        let mut merger = BundleMerger::new();
        merger.consume(&bundle_of(vec![BundleEntry::new(obs(Some("b"), vec![]))]));
        merger.consume(&bundle_of(vec![
            BundleEntry::new(obs(Some("a"), vec![])),
            BundleEntry::new(obs(Some("b"), vec![])),
        ]));

        let ids: Vec<_> = merger
            .into_merged()
            .resources()
            .filter_map(|r| r.id().map(str::to_string))
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
