//! Classify every point in a frame and extend the frame's schema with the
//! results.

use crate::data::{ClassificationResult, SparsePoint};
use crate::error::{Error, Result};
use crate::frame::{self, Field, Frame, Record, Schema};
use log::{info, warn};
use pbr::ProgressBar;
use rayon::prelude::*;
use std::io::{stderr, Stderr};
use std::sync::{Arc, Mutex};

fn create_progress_bar(total: u64) -> ProgressBar<Stderr> {
    ProgressBar::on(stderr(), total)
}

/// Read-only state replicated to every worker for one run.
///
/// Handed out at task-dispatch time and never mutated; build a new broadcast
/// instead of changing state between runs. Cloning only bumps a reference
/// count.
#[derive(Clone, Debug)]
pub struct Broadcast<T>(Arc<T>);

impl<T> Broadcast<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn value(&self) -> &T {
        &self.0
    }
}

/// A per-point classification function.
///
/// Implementations typically close over broadcast model state; see
/// [`StatefulClassifier`].
pub trait PointClassifier: Send + Sync {
    fn classify(&self, point: &SparsePoint) -> Result<ClassificationResult>;
}

impl<F> PointClassifier for F
where
    F: Fn(&SparsePoint) -> Result<ClassificationResult> + Send + Sync,
{
    fn classify(&self, point: &SparsePoint) -> Result<ClassificationResult> {
        self(point)
    }
}

/// Binds a classification function to broadcast state, yielding a
/// [`PointClassifier`].
pub struct StatefulClassifier<S, F> {
    state: Broadcast<S>,
    function: F,
}

impl<S, F> StatefulClassifier<S, F>
where
    S: Send + Sync,
    F: Fn(&SparsePoint, &S) -> Result<ClassificationResult> + Send + Sync,
{
    pub fn new(state: Broadcast<S>, function: F) -> Self {
        Self { state, function }
    }
}

impl<S, F> PointClassifier for StatefulClassifier<S, F>
where
    S: Send + Sync,
    F: Fn(&SparsePoint, &S) -> Result<ClassificationResult> + Send + Sync,
{
    fn classify(&self, point: &SparsePoint) -> Result<ClassificationResult> {
        (self.function)(point, self.state.value())
    }
}

/// What to do when the classification function fails for one record.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RecordErrorPolicy {
    /// Abort the whole transform at the first failing record. The default:
    /// silent partial results are worse than an aborted run.
    #[default]
    FailFast,
    /// Drop failing records from the output, logging a warning for each.
    SkipRecord,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Name of the input column holding encoded points.
    pub input_col: String,
    /// Name of the appended column holding encoded classification results.
    pub output_col: String,
    pub on_error: RecordErrorPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_col: "points".to_owned(),
            output_col: "results".to_owned(),
            on_error: RecordErrorPolicy::default(),
        }
    }
}

/// Applies a classification function to every point in a frame, producing a
/// new frame whose schema is the input schema plus one appended non-nullable
/// result column.
pub struct ClassificationPipeline<C> {
    config: PipelineConfig,
    n_features: usize,
    classifier: C,
}

impl<C: PointClassifier> ClassificationPipeline<C> {
    /// Panics if `n_features` is zero.
    pub fn new(config: PipelineConfig, n_features: usize, classifier: C) -> Self {
        assert!(n_features > 0, "the number of features is less than 1");
        Self {
            config,
            n_features,
            classifier,
        }
    }

    /// Validate the input schema and produce the extended output schema,
    /// without touching any record. Cheap, and always run before any
    /// distributed work starts.
    pub fn transform_schema(&self, schema: &Schema) -> Result<Schema> {
        let field = schema.field(&self.config.input_col).ok_or_else(|| {
            Error::Schema(format!(
                "the input column \"{}\" does not exist",
                self.config.input_col
            ))
        })?;
        frame::check_point_data_type(&field.data_type)?;
        schema.with_appended_field(Field::new(
            &self.config.output_col,
            frame::classification_result_data_type(),
            false,
        ))
    }

    /// Classify every record's point and emit a new frame.
    ///
    /// Every original column is copied verbatim; the result column is
    /// appended at the end. The input frame is never mutated, and no frame is
    /// returned at all unless every record (minus any skipped under
    /// `SkipRecord`) was classified.
    pub fn transform(&self, input: &Frame) -> Result<Frame> {
        let output_schema = self.transform_schema(input.schema())?;
        // Presence was just validated.
        let input_index = input
            .schema()
            .field_index(&self.config.input_col)
            .ok_or_else(|| {
                Error::Schema(format!(
                    "the input column \"{}\" does not exist",
                    self.config.input_col
                ))
            })?;
        let input_type = input.schema().fields[input_index].data_type.clone();

        let n_features = Broadcast::new(self.n_features);

        info!("Classifying {} records", input.len());
        let start_t = time::precise_time_s();
        let pb = Mutex::new(create_progress_bar(input.len() as u64));

        let classify_record = |record: &Record| -> Result<Record> {
            let point = frame::decode_point(
                &record.values[input_index],
                &input_type,
                *n_features.value(),
            )?;
            let result = self.classifier.classify(&point).map_err(|e| match e {
                err @ Error::Classification { .. } => err,
                other => Error::Classification {
                    point_id: point.id,
                    msg: other.to_string(),
                },
            })?;
            let mut values = record.values.clone();
            values.push(frame::encode_result(&result));
            pb.lock().expect("Failed to lock progress bar").add(1);
            Ok(Record::new(values))
        };

        let records: Vec<Record> = match self.config.on_error {
            RecordErrorPolicy::FailFast => input
                .records()
                .par_iter()
                .map(|record| classify_record(record))
                .collect::<Result<_>>()?,
            RecordErrorPolicy::SkipRecord => input
                .records()
                .par_iter()
                .filter_map(|record| match classify_record(record) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("Dropping record: {}", e);
                        None
                    }
                })
                .collect(),
        };

        info!(
            "Classified {} records; it took {:.2}s",
            records.len(),
            time::precise_time_s() - start_t
        );
        Frame::new(output_schema, records)
    }
}
