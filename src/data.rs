use crate::error::{Error, Result};
use crate::{DocId, Index, IndexValueVec, LabelSet};
use itertools::Itertools;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One sparse, labeled feature vector with a stable identifier.
///
/// Feature indices are 0-based, strictly increasing, unique, and bounded by
/// `n_features`; the label set may be empty (an unlabeled/negative point).
/// Points are constructed once and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparsePoint {
    pub id: DocId,
    pub n_features: usize,
    pub features: IndexValueVec,
    pub labels: LabelSet,
}

impl SparsePoint {
    /// Checks that feature indices are strictly increasing, unique, and all
    /// smaller than `n_features`.
    pub fn has_valid_features(&self) -> bool {
        valid_feature_pairs(&self.features, self.n_features)
    }

    /// Re-encode this point as one line in the sparse text format, inverting
    /// the label and feature-id shifts applied at parse time.
    pub fn to_libsvm_line(&self, config: &ParseConfig) -> String {
        let label_spec = if config.binary_problem {
            if self.labels.is_empty() { "-1".to_owned() } else { "1".to_owned() }
        } else {
            let shift = if config.labels_0_based { 0 } else { 1 };
            self.labels
                .iter()
                .copied()
                .sorted()
                .map(|label| (label + shift).to_string())
                .join(",")
        };
        let mut line = label_spec;
        for &(feature, weight) in &self.features {
            line.push_str(&format!(" {}:{}", feature + 1, weight));
        }
        line
    }
}

fn valid_feature_pairs(features: &[(Index, f32)], n_features: usize) -> bool {
    if let Some(&(last, _)) = features.last() {
        if last as usize >= n_features {
            return false;
        }
    }
    features.windows(2).all(|w| w[0].0 < w[1].0)
}

/// The outcome of classifying one point: predicted labels, their scores, and
/// the per-label decision thresholds, in positional correspondence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub point_id: DocId,
    pub labels: Vec<Index>,
    pub scores: Vec<f64>,
    pub positive_thresholds: Vec<f64>,
}

impl ClassificationResult {
    /// Panics if the three parallel sequences differ in length.
    pub fn new(
        point_id: DocId,
        labels: Vec<Index>,
        scores: Vec<f64>,
        positive_thresholds: Vec<f64>,
    ) -> Self {
        assert_eq!(labels.len(), scores.len());
        assert_eq!(labels.len(), positive_thresholds.len());
        Self {
            point_id,
            labels,
            scores,
            positive_thresholds,
        }
    }
}

/// Settings controlling how the label part of a line is interpreted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseConfig {
    /// Label ids in the input are already 0-based; otherwise they are shifted
    /// down by one at parse time.
    pub labels_0_based: bool,
    /// The input is a binary problem with a single signed label per line:
    /// a positive value maps to label set `{0}`, anything else to the empty
    /// set.
    pub binary_problem: bool,
}

/// What to do when a line fails to parse.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LineErrorPolicy {
    /// Abort ingestion of the whole collection at the first malformed line.
    #[default]
    FailFast,
    /// Skip malformed lines, logging a warning for each.
    SkipLine,
}

/// What to do when a blank line is encountered mid-file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BlankLinePolicy {
    /// Blank lines are dropped; they consume no document ids.
    #[default]
    Skip,
    /// Any blank line aborts ingestion.
    Reject,
}

/// Full ingestion configuration for loading a collection from text.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadConfig {
    pub parse: ParseConfig,
    pub error_policy: LineErrorPolicy,
    pub blank_lines: BlankLinePolicy,
}

fn parse_label_spec(labels_str: &str, line: &str, config: &ParseConfig) -> Result<LabelSet> {
    let mut labels = LabelSet::new();
    if config.binary_problem {
        if labels_str.contains(',') {
            return Err(Error::Parse(format!(
                "a binary problem takes a single signed label per line, got \"{}\" in line \"{}\"",
                labels_str, line
            )));
        }
        let value = labels_str.parse::<f64>().map_err(|_| {
            Error::Parse(format!(
                "failed to parse label \"{}\" in line \"{}\"",
                labels_str, line
            ))
        })?;
        if value > 0. {
            labels.insert(0);
        }
    } else {
        for label_str in labels_str.split(',') {
            if label_str.is_empty() {
                continue;
            }
            // Labels are parsed as floats and truncated, so "1.0" is a valid
            // label token.
            let raw = label_str.parse::<f64>().map_err(|_| {
                Error::Parse(format!(
                    "failed to parse label \"{}\" in line \"{}\"",
                    label_str, line
                ))
            })? as i64;
            let label = if config.labels_0_based { raw } else { raw - 1 };
            if label < 0 {
                return Err(Error::InvalidLabel {
                    line: line.to_owned(),
                    label,
                });
            }
            labels.insert(label as Index);
        }
    }
    labels.shrink_to_fit();
    Ok(labels)
}

/// Parse one non-empty line in the sparse text format.
///
/// The line should be in the following format:
/// label1,label2,...labelk ft1:ft1_val ft2:ft2_val ... [# comment]
///
/// Feature ids are 1-based in the input and converted to 0-based here.
/// Duplicate or out-of-range feature indices are not checked at this level;
/// that is the caller's job once the collection's feature count is known.
pub fn parse_libsvm_line(line: &str, config: &ParseConfig) -> Result<(IndexValueVec, LabelSet)> {
    let mut token_iter = line.split(' ');

    let labels_str = token_iter
        .next()
        .ok_or_else(|| Error::Parse(format!("failed to find labels in line \"{}\"", line)))?;
    let labels = parse_label_spec(labels_str, line, config)?;

    let mut features = Vec::new();
    for pair_str in token_iter {
        if pair_str.starts_with('#') {
            // Beginning of a comment, skip the rest of the line.
            break;
        }
        let mut pair_iter = pair_str.split(':');
        let feature = pair_iter
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                Error::Parse(format!(
                    "failed to parse feature in token \"{}\" of line \"{}\"",
                    pair_str, line
                ))
            })?;
        let weight = pair_iter
            .next()
            .and_then(|s| s.parse::<f32>().ok())
            .ok_or_else(|| {
                Error::Parse(format!(
                    "failed to parse weight in token \"{}\" of line \"{}\"",
                    pair_str, line
                ))
            })?;
        if pair_iter.next().is_some() {
            return Err(Error::Parse(format!(
                "malformed feature token \"{}\" in line \"{}\"",
                pair_str, line
            )));
        }
        if feature < 1 {
            return Err(Error::Parse(format!(
                "feature id {} in line \"{}\" is not 1-based",
                feature, line
            )));
        }
        features.push(((feature - 1) as Index, weight));
    }
    features.sort_unstable_by_key(|&(i, _)| i);
    features.shrink_to_fit();

    Ok((features, labels))
}

fn max_feature_id(line: &str) -> usize {
    let mut max_id = 0;
    for token in line.split(' ').skip(1) {
        if token.starts_with('#') {
            break;
        }
        if let Some(id) = token.split(':').next().and_then(|s| s.parse::<usize>().ok()) {
            max_id = max_id.max(id);
        }
    }
    max_id
}

/// Scan a whole collection of lines for the maximum 1-based feature id.
///
/// The result is used directly as the declared feature count, so the largest
/// observed feature id remains a valid 0-based index at `n_features - 1`.
pub fn compute_n_features(lines: &[&str]) -> usize {
    lines
        .par_iter()
        .map(|line| max_feature_id(line))
        .reduce(|| 0, usize::max)
}

/// A collection of sparse points sharing one feature space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub n_features: usize,
    pub points: Vec<SparsePoint>,
}

impl DataSet {
    pub fn n_docs(&self) -> usize {
        self.points.len()
    }

    /// Number of distinct label slots, i.e. the largest label id plus one.
    /// Returns 0 for a fully unlabeled collection.
    pub fn n_labels(&self) -> usize {
        self.points
            .par_iter()
            .map(|point| {
                point
                    .labels
                    .iter()
                    .max()
                    .map_or(0, |&label| label as usize + 1)
            })
            .reduce(|| 0, usize::max)
    }

    /// Parse a collection of lines into a dataset.
    ///
    /// The feature count is the maximum 1-based feature id observed across
    /// all lines. Document ids are assigned by row order; blank lines and
    /// (under `SkipLine`) malformed lines consume no ids.
    pub fn parse_collection(lines: &[&str], config: &LoadConfig) -> Result<Self> {
        if config.blank_lines == BlankLinePolicy::Reject {
            if let Some(i) = lines.iter().position(|line| line.trim().is_empty()) {
                return Err(Error::Parse(format!("blank line at row {}", i)));
            }
        }

        let n_features = compute_n_features(lines);

        let parse_one = |line: &str| -> Result<(IndexValueVec, LabelSet)> {
            let (features, labels) = parse_libsvm_line(line, &config.parse)?;
            if !valid_feature_pairs(&features, n_features) {
                return Err(Error::Parse(format!(
                    "duplicate feature indices in line \"{}\"",
                    line
                )));
            }
            Ok((features, labels))
        };

        let parsed: Vec<Option<(IndexValueVec, LabelSet)>> = match config.error_policy {
            LineErrorPolicy::FailFast => lines
                .par_iter()
                .map(|line| {
                    if line.trim().is_empty() {
                        Ok(None)
                    } else {
                        parse_one(line).map(Some)
                    }
                })
                .collect::<Result<_>>()?,
            LineErrorPolicy::SkipLine => lines
                .par_iter()
                .map(|line| {
                    if line.trim().is_empty() {
                        return None;
                    }
                    match parse_one(line) {
                        Ok(parsed) => Some(parsed),
                        Err(e) => {
                            warn!("Skipping line: {}", e);
                            None
                        }
                    }
                })
                .collect(),
        };

        let points = parsed
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(id, (features, labels))| SparsePoint {
                id: id as DocId,
                n_features,
                features,
                labels,
            })
            .collect_vec();

        Ok(Self { n_features, points })
    }

    /// Load a collection from a data file in the sparse text format.
    pub fn load_libsvm_file<P: AsRef<Path>>(path: P, config: &LoadConfig) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading data from {}", path.display());
        let start_t = time::precise_time_s();

        let file_content = fs::read_to_string(path)?;
        let lines: Vec<&str> = file_content.par_lines().collect();
        let dataset = Self::parse_collection(&lines, config)?;

        info!(
            "Loaded {} points with {} features; it took {:.2}s",
            dataset.n_docs(),
            dataset.n_features,
            time::precise_time_s() - start_t
        );
        Ok(dataset)
    }
}
