//! Inverted indices over a point collection.
//!
//! Both indices are built with pure, associative, commutative merge steps, so
//! partial aggregates computed on disjoint partitions of a collection can be
//! combined pairwise in any order and still finalize to the same entries.

use crate::data::SparsePoint;
use crate::{DocId, Index, LabelSet};
use hashbrown::HashMap;
use itertools::Itertools;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Documents carrying one label.
///
/// `documents` is sorted ascending and duplicate-free: a point contributes
/// its id at most once per label it carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelIndexEntry {
    pub label: Index,
    pub documents: Vec<DocId>,
}

/// Documents containing one feature, paired position-by-position with each
/// document's label set.
///
/// `documents` and `label_sets` always have the same length; the pairing is
/// preserved through every merge step. Document order is unspecified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureIndexEntry {
    pub feature: Index,
    pub documents: Vec<DocId>,
    pub label_sets: Vec<LabelSet>,
}

/// Partial label → documents aggregate.
///
/// Safe to build independently per partition and merge in any order;
/// `into_entries` normalizes posting order, so the finalized index is
/// invariant to how the collection was partitioned.
#[derive(Clone, Debug, Default)]
pub struct LabelIndex {
    postings: HashMap<Index, Vec<DocId>>,
}

impl LabelIndex {
    pub fn build(points: &[SparsePoint]) -> Self {
        points
            .par_iter()
            .fold(Self::default, |mut index, point| {
                index.add(point);
                index
            })
            .reduce(Self::default, Self::merge)
    }

    fn add(&mut self, point: &SparsePoint) {
        for &label in &point.labels {
            self.postings.entry(label).or_default().push(point.id);
        }
    }

    /// Combine two partial aggregates by concatenating postings per label.
    pub fn merge(mut self, other: Self) -> Self {
        for (label, mut documents) in other.postings {
            self.postings.entry(label).or_default().append(&mut documents);
        }
        self
    }

    /// Finalize into entries sorted by label id, each posting list sorted
    /// ascending by document id.
    pub fn into_entries(self) -> Vec<LabelIndexEntry> {
        self.postings
            .into_iter()
            .map(|(label, mut documents)| {
                documents.sort_unstable();
                LabelIndexEntry { label, documents }
            })
            .sorted_by_key(|entry| entry.label)
            .collect()
    }
}

/// Partial feature → (documents, label sets) aggregate.
///
/// The two posting vectors per feature grow in lockstep, both in `add` and in
/// `merge`, which keeps the positional correspondence intact regardless of
/// partitioning or merge order.
#[derive(Clone, Debug, Default)]
pub struct FeatureIndex {
    postings: HashMap<Index, (Vec<DocId>, Vec<LabelSet>)>,
}

impl FeatureIndex {
    pub fn build(points: &[SparsePoint]) -> Self {
        points
            .par_iter()
            .fold(Self::default, |mut index, point| {
                index.add(point);
                index
            })
            .reduce(Self::default, Self::merge)
    }

    fn add(&mut self, point: &SparsePoint) {
        for &(feature, weight) in &point.features {
            if weight == 0. {
                continue;
            }
            let (documents, label_sets) = self.postings.entry(feature).or_default();
            documents.push(point.id);
            label_sets.push(point.labels.clone());
        }
    }

    /// Combine two partial aggregates by concatenating both parallel posting
    /// vectors per feature in the same relative order.
    pub fn merge(mut self, other: Self) -> Self {
        for (feature, (mut documents, mut label_sets)) in other.postings {
            let (existing_documents, existing_label_sets) =
                self.postings.entry(feature).or_default();
            existing_documents.append(&mut documents);
            existing_label_sets.append(&mut label_sets);
        }
        self
    }

    /// Finalize into entries sorted by feature id.
    pub fn into_entries(self) -> Vec<FeatureIndexEntry> {
        self.postings
            .into_iter()
            .map(|(feature, (documents, label_sets))| FeatureIndexEntry {
                feature,
                documents,
                label_sets,
            })
            .sorted_by_key(|entry| entry.feature)
            .collect()
    }
}

/// Build the label → documents index for a whole collection.
pub fn build_label_index(points: &[SparsePoint]) -> Vec<LabelIndexEntry> {
    let start_t = time::precise_time_s();
    let entries = LabelIndex::build(points).into_entries();
    info!(
        "Built label index with {} entries over {} points; it took {:.2}s",
        entries.len(),
        points.len(),
        time::precise_time_s() - start_t
    );
    entries
}

/// Build the feature → (documents, label sets) index for a whole collection.
pub fn build_feature_index(points: &[SparsePoint]) -> Vec<FeatureIndexEntry> {
    let start_t = time::precise_time_s();
    let entries = FeatureIndex::build(points).into_entries();
    info!(
        "Built feature index with {} entries over {} points; it took {:.2}s",
        entries.len(),
        points.len(),
        time::precise_time_s() - start_t
    );
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataSet, LoadConfig};
    use std::iter::FromIterator;

    fn example_points() -> Vec<SparsePoint> {
        let lines = vec!["1,2 1:0.5 3:1.0", "2 2:0.3"];
        DataSet::parse_collection(&lines, &LoadConfig::default())
            .unwrap()
            .points
    }

    #[test]
    fn test_build_label_index() {
        let entries = build_label_index(&example_points());
        assert_eq!(
            vec![
                LabelIndexEntry {
                    label: 0,
                    documents: vec![0],
                },
                LabelIndexEntry {
                    label: 1,
                    documents: vec![0, 1],
                },
            ],
            entries
        );
    }

    #[test]
    fn test_build_feature_index() {
        let entries = build_feature_index(&example_points());
        assert_eq!(
            vec![
                FeatureIndexEntry {
                    feature: 0,
                    documents: vec![0],
                    label_sets: vec![LabelSet::from_iter(vec![0, 1])],
                },
                FeatureIndexEntry {
                    feature: 1,
                    documents: vec![1],
                    label_sets: vec![LabelSet::from_iter(vec![1])],
                },
                FeatureIndexEntry {
                    feature: 2,
                    documents: vec![0],
                    label_sets: vec![LabelSet::from_iter(vec![0, 1])],
                },
            ],
            entries
        );
    }

    fn scrambled_points() -> Vec<SparsePoint> {
        let lines = vec![
            "3 1:0.1",
            "1,3 2:0.2 4:0.4",
            "2 1:0.3",
            " 3:0.5",
            "1,2,3 2:0.6",
            "2 4:0.7 # comment",
        ];
        DataSet::parse_collection(&lines, &LoadConfig::default())
            .unwrap()
            .points
    }

    #[test]
    fn test_label_index_is_partition_invariant() {
        let points = scrambled_points();
        let whole = LabelIndex::build(&points).into_entries();

        for split in [1, 2, 4] {
            let (left, right) = points.split_at(split);
            let a = LabelIndex::build(left);
            let b = LabelIndex::build(right);
            assert_eq!(whole, a.clone().merge(b.clone()).into_entries());
            assert_eq!(whole, b.merge(a).into_entries());
        }
    }

    #[test]
    fn test_feature_index_merge_preserves_pairing() {
        let points = scrambled_points();
        let (left, right) = points.split_at(3);
        let merged = FeatureIndex::build(right)
            .merge(FeatureIndex::build(left))
            .into_entries();

        for entry in &merged {
            assert_eq!(entry.documents.len(), entry.label_sets.len());
            for (&doc, labels) in entry.documents.iter().zip(&entry.label_sets) {
                let point = points.iter().find(|p| p.id == doc).unwrap();
                assert_eq!(&point.labels, labels);
                assert!(point
                    .features
                    .iter()
                    .any(|&(f, w)| f == entry.feature && w != 0.));
            }
        }
    }

    #[test]
    fn test_unlabeled_point_contributions() {
        let points = scrambled_points();
        // Point 3 (" 3:0.5") has no labels: absent from the label index,
        // present in the feature index with an empty label set.
        let label_entries = build_label_index(&points);
        assert!(label_entries
            .iter()
            .all(|entry| !entry.documents.contains(&3)));

        let feature_entries = build_feature_index(&points);
        let entry = feature_entries.iter().find(|e| e.feature == 2).unwrap();
        assert_eq!(vec![3], entry.documents);
        assert_eq!(vec![LabelSet::new()], entry.label_sets);
    }

    #[test]
    fn test_pointless_contributions() {
        let points = vec![
            SparsePoint {
                id: 0,
                n_features: 4,
                features: vec![],
                labels: LabelSet::from_iter(vec![1]),
            },
            SparsePoint {
                id: 1,
                n_features: 4,
                features: vec![(2, 0.)],
                labels: LabelSet::new(),
            },
        ];
        // No nonzero features means no feature index contributions at all.
        assert!(build_feature_index(&points).is_empty());
        assert_eq!(
            vec![LabelIndexEntry {
                label: 1,
                documents: vec![0],
            }],
            build_label_index(&points)
        );
    }
}
