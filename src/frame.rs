//! A minimal structured-record model.
//!
//! Frames carry points and classification results alongside arbitrary caller
//! columns; the pipeline only ever appends a column, never renames or removes
//! one. This module also defines the conventional struct encodings of
//! [`SparsePoint`] and [`ClassificationResult`] and their structural checks.

use crate::data::{ClassificationResult, SparsePoint};
use crate::error::{Error, Result};
use crate::{DocId, Index, LabelSet};
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const POINT_ID: &str = "point_id";
pub const FEATURES: &str = "features";
pub const WEIGHTS: &str = "weights";
pub const LABELS: &str = "labels";
pub const SCORES: &str = "scores";
pub const POSITIVE_THRESHOLDS: &str = "positive_thresholds";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    Int,
    Double,
    IntList,
    DoubleList,
    Struct(Vec<Field>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: FieldType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: &str, data_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.to_owned(),
            data_type,
            nullable,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field_index(name).is_some()
    }

    /// Returns a copy of this schema with one field appended at the end.
    /// Existing fields are never renamed, removed, or overwritten; a name
    /// collision is an error.
    pub fn with_appended_field(&self, field: Field) -> Result<Schema> {
        if self.contains(&field.name) {
            return Err(Error::Schema(format!(
                "the column \"{}\" already exists in this schema",
                field.name
            )));
        }
        let mut fields = self.fields.clone();
        fields.push(field);
        Ok(Schema { fields })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Double(f64),
    IntList(Vec<i64>),
    DoubleList(Vec<f64>),
    Struct(Vec<Value>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// A collection of records sharing one schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    schema: Schema,
    records: Vec<Record>,
}

impl Frame {
    /// Fails if any record's arity differs from the schema's.
    pub fn new(schema: Schema, records: Vec<Record>) -> Result<Self> {
        let n_fields = schema.fields.len();
        if let Some(i) = records.iter().position(|r| r.values.len() != n_fields) {
            return Err(Error::Schema(format!(
                "record {} has {} values but the schema has {} fields",
                i,
                records[i].values.len(),
                n_fields
            )));
        }
        Ok(Self { schema, records })
    }

    /// A single-column frame of encoded points, the conventional input shape
    /// for the classification pipeline.
    pub fn from_points(points: &[SparsePoint], column: &str) -> Self {
        let schema = Schema::new(vec![Field::new(column, point_data_type(), false)]);
        let records = points
            .iter()
            .map(|point| Record::new(vec![encode_point(point)]))
            .collect();
        Self { schema, records }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The struct encoding of a sparse point: four named, non-nullable fields.
pub fn point_data_type() -> FieldType {
    FieldType::Struct(vec![
        Field::new(POINT_ID, FieldType::Int, false),
        Field::new(FEATURES, FieldType::IntList, false),
        Field::new(WEIGHTS, FieldType::DoubleList, false),
        Field::new(LABELS, FieldType::IntList, false),
    ])
}

/// The struct encoding of a classification result: four named, non-nullable
/// fields, the three list fields in positional correspondence.
pub fn classification_result_data_type() -> FieldType {
    FieldType::Struct(vec![
        Field::new(POINT_ID, FieldType::Int, false),
        Field::new(LABELS, FieldType::IntList, false),
        Field::new(SCORES, FieldType::DoubleList, false),
        Field::new(POSITIVE_THRESHOLDS, FieldType::DoubleList, false),
    ])
}

fn as_struct_fields(data_type: &FieldType) -> Result<&[Field]> {
    match data_type {
        FieldType::Struct(fields) => Ok(fields),
        other => Err(Error::Schema(format!(
            "expected a struct column, got {:?}",
            other
        ))),
    }
}

fn check_struct_fields(data_type: &FieldType, expected: &[(&str, FieldType)]) -> Result<()> {
    let fields = as_struct_fields(data_type)?;
    for (name, expected_type) in expected {
        match fields.iter().find(|field| field.name == *name) {
            Some(field) if field.data_type == *expected_type => {}
            Some(field) => {
                return Err(Error::Schema(format!(
                    "the field \"{}\" has type {:?}, expected {:?}",
                    name, field.data_type, expected_type
                )))
            }
            None => {
                return Err(Error::Schema(format!(
                    "the field \"{}\" does not exist",
                    name
                )))
            }
        }
    }
    Ok(())
}

/// Structural check that a column type can hold encoded sparse points.
pub fn check_point_data_type(data_type: &FieldType) -> Result<()> {
    check_struct_fields(
        data_type,
        &[
            (POINT_ID, FieldType::Int),
            (FEATURES, FieldType::IntList),
            (WEIGHTS, FieldType::DoubleList),
            (LABELS, FieldType::IntList),
        ],
    )
}

/// Structural check that a column type can hold encoded classification
/// results.
pub fn check_classification_result_data_type(data_type: &FieldType) -> Result<()> {
    check_struct_fields(
        data_type,
        &[
            (POINT_ID, FieldType::Int),
            (LABELS, FieldType::IntList),
            (SCORES, FieldType::DoubleList),
            (POSITIVE_THRESHOLDS, FieldType::DoubleList),
        ],
    )
}

pub fn encode_point(point: &SparsePoint) -> Value {
    Value::Struct(vec![
        Value::Int(i64::from(point.id)),
        Value::IntList(point.features.iter().map(|&(i, _)| i64::from(i)).collect()),
        Value::DoubleList(point.features.iter().map(|&(_, w)| f64::from(w)).collect()),
        Value::IntList(point.labels.iter().copied().sorted().map(i64::from).collect()),
    ])
}

pub fn encode_result(result: &ClassificationResult) -> Value {
    Value::Struct(vec![
        Value::Int(i64::from(result.point_id)),
        Value::IntList(result.labels.iter().copied().map(i64::from).collect()),
        Value::DoubleList(result.scores.clone()),
        Value::DoubleList(result.positive_thresholds.clone()),
    ])
}

struct StructAccessor<'a> {
    fields: &'a [Field],
    values: &'a [Value],
}

impl<'a> StructAccessor<'a> {
    fn new(data_type: &'a FieldType, value: &'a Value) -> Result<Self> {
        let fields = as_struct_fields(data_type)?;
        let values = match value {
            Value::Struct(values) => values,
            other => {
                return Err(Error::Schema(format!(
                    "expected a struct value, got {:?}",
                    other
                )))
            }
        };
        if fields.len() != values.len() {
            return Err(Error::Schema(format!(
                "struct value has {} fields but its type declares {}",
                values.len(),
                fields.len()
            )));
        }
        Ok(Self { fields, values })
    }

    fn get(&self, name: &str) -> Result<&'a Value> {
        self.fields
            .iter()
            .position(|field| field.name == name)
            .map(|i| &self.values[i])
            .ok_or_else(|| Error::Schema(format!("the field \"{}\" does not exist", name)))
    }

    fn int(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            Value::Int(v) => Ok(*v),
            other => Err(Error::Schema(format!(
                "the field \"{}\" holds {:?}, expected Int",
                name, other
            ))),
        }
    }

    fn int_list(&self, name: &str) -> Result<&'a [i64]> {
        match self.get(name)? {
            Value::IntList(v) => Ok(v),
            other => Err(Error::Schema(format!(
                "the field \"{}\" holds {:?}, expected IntList",
                name, other
            ))),
        }
    }

    fn double_list(&self, name: &str) -> Result<&'a [f64]> {
        match self.get(name)? {
            Value::DoubleList(v) => Ok(v),
            other => Err(Error::Schema(format!(
                "the field \"{}\" holds {:?}, expected DoubleList",
                name, other
            ))),
        }
    }
}

fn to_index(raw: i64, what: &str) -> Result<Index> {
    Index::try_from(raw)
        .map_err(|_| Error::Schema(format!("{} id {} is out of range", what, raw)))
}

/// Decode an encoded point value, supplying the collection-wide feature
/// count.
pub fn decode_point(value: &Value, data_type: &FieldType, n_features: usize) -> Result<SparsePoint> {
    let accessor = StructAccessor::new(data_type, value)?;

    let id = to_index(accessor.int(POINT_ID)?, "point")? as DocId;
    let feature_ids = accessor.int_list(FEATURES)?;
    let weights = accessor.double_list(WEIGHTS)?;
    if feature_ids.len() != weights.len() {
        return Err(Error::Schema(format!(
            "the \"{}\" and \"{}\" lists of point {} differ in length ({} vs {})",
            FEATURES,
            WEIGHTS,
            id,
            feature_ids.len(),
            weights.len()
        )));
    }

    let features = feature_ids
        .iter()
        .zip(weights)
        .map(|(&i, &w)| Ok((to_index(i, "feature")?, w as f32)))
        .collect::<Result<Vec<_>>>()?;
    let labels = accessor
        .int_list(LABELS)?
        .iter()
        .map(|&label| to_index(label, "label"))
        .collect::<Result<LabelSet>>()?;

    Ok(SparsePoint {
        id,
        n_features,
        features,
        labels,
    })
}

/// Decode an encoded classification result value.
pub fn decode_result(value: &Value, data_type: &FieldType) -> Result<ClassificationResult> {
    let accessor = StructAccessor::new(data_type, value)?;

    let point_id = to_index(accessor.int(POINT_ID)?, "point")? as DocId;
    let labels = accessor
        .int_list(LABELS)?
        .iter()
        .map(|&label| to_index(label, "label"))
        .collect::<Result<Vec<_>>>()?;
    let scores = accessor.double_list(SCORES)?.to_vec();
    let positive_thresholds = accessor.double_list(POSITIVE_THRESHOLDS)?.to_vec();
    if labels.len() != scores.len() || labels.len() != positive_thresholds.len() {
        return Err(Error::Schema(format!(
            "the result lists of point {} differ in length",
            point_id
        )));
    }

    Ok(ClassificationResult {
        point_id,
        labels,
        scores,
        positive_thresholds,
    })
}

/// Scan a frame column of encoded points for the largest feature id and
/// return it plus one, i.e. a feature count under which every observed index
/// is addressable.
pub fn compute_n_features_from_frame(frame: &Frame, column: &str) -> Result<usize> {
    let column_index = frame
        .schema()
        .field_index(column)
        .ok_or_else(|| Error::Schema(format!("the column \"{}\" does not exist", column)))?;
    let data_type = &frame.schema().fields[column_index].data_type;
    check_point_data_type(data_type)?;

    let max_id = frame
        .records()
        .par_iter()
        .map(|record| {
            let accessor = StructAccessor::new(data_type, &record.values[column_index])?;
            Ok::<i64, Error>(accessor.int_list(FEATURES)?.iter().copied().max().unwrap_or(-1))
        })
        .try_reduce(|| -1, |a, b| Ok(a.max(b)))?;

    Ok(usize::try_from(max_id + 1).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    fn sample_point() -> SparsePoint {
        SparsePoint {
            id: 7,
            n_features: 5,
            features: vec![(0, 0.5), (2, 1.0), (4, 0.25)],
            labels: LabelSet::from_iter(vec![3, 1]),
        }
    }

    #[test]
    fn test_schema_append_rejects_collision() {
        let schema = Schema::new(vec![Field::new("points", point_data_type(), false)]);
        let appended = schema
            .with_appended_field(Field::new("results", classification_result_data_type(), false))
            .unwrap();
        assert_eq!(2, appended.fields.len());
        assert_eq!(Some(1), appended.field_index("results"));

        assert!(matches!(
            appended.with_appended_field(Field::new("results", FieldType::Int, false)),
            Err(Error::Schema(_))
        ));
        // The original schema is untouched either way.
        assert_eq!(1, schema.fields.len());
    }

    #[test]
    fn test_check_point_data_type() {
        assert!(check_point_data_type(&point_data_type()).is_ok());
        assert!(matches!(
            check_point_data_type(&FieldType::Int),
            Err(Error::Schema(_))
        ));

        let missing = FieldType::Struct(vec![Field::new(POINT_ID, FieldType::Int, false)]);
        assert!(matches!(
            check_point_data_type(&missing),
            Err(Error::Schema(_))
        ));

        let mistyped = FieldType::Struct(vec![
            Field::new(POINT_ID, FieldType::Int, false),
            Field::new(FEATURES, FieldType::DoubleList, false),
            Field::new(WEIGHTS, FieldType::DoubleList, false),
            Field::new(LABELS, FieldType::IntList, false),
        ]);
        assert!(matches!(
            check_point_data_type(&mistyped),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_point_roundtrip() {
        let point = sample_point();
        let encoded = encode_point(&point);
        assert_eq!(
            Value::Struct(vec![
                Value::Int(7),
                Value::IntList(vec![0, 2, 4]),
                Value::DoubleList(vec![0.5, 1.0, 0.25]),
                Value::IntList(vec![1, 3]),
            ]),
            encoded
        );
        let decoded = decode_point(&encoded, &point_data_type(), 5).unwrap();
        assert_eq!(point, decoded);
    }

    #[test]
    fn test_decode_point_rejects_mismatched_lists() {
        let bad = Value::Struct(vec![
            Value::Int(0),
            Value::IntList(vec![0, 2]),
            Value::DoubleList(vec![0.5]),
            Value::IntList(vec![]),
        ]);
        assert!(matches!(
            decode_point(&bad, &point_data_type(), 5),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_result_roundtrip() {
        let result = ClassificationResult::new(7, vec![1, 3], vec![0.9, 0.2], vec![0.5, 0.5]);
        let encoded = encode_result(&result);
        assert!(check_classification_result_data_type(&classification_result_data_type()).is_ok());
        let decoded = decode_result(&encoded, &classification_result_data_type()).unwrap();
        assert_eq!(result, decoded);
    }

    #[test]
    fn test_frame_arity_check() {
        let schema = Schema::new(vec![
            Field::new("a", FieldType::Int, false),
            Field::new("b", FieldType::Double, true),
        ]);
        assert!(Frame::new(
            schema.clone(),
            vec![Record::new(vec![Value::Int(1), Value::Null])]
        )
        .is_ok());
        assert!(matches!(
            Frame::new(schema, vec![Record::new(vec![Value::Int(1)])]),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_compute_n_features_from_frame() {
        let points = vec![
            sample_point(),
            SparsePoint {
                id: 8,
                n_features: 5,
                features: vec![(1, 1.0)],
                labels: LabelSet::new(),
            },
        ];
        let frame = Frame::from_points(&points, "points");
        assert_eq!(5, compute_n_features_from_frame(&frame, "points").unwrap());
        assert!(matches!(
            compute_n_features_from_frame(&frame, "nope"),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_empty_frame_has_no_features() {
        let frame = Frame::from_points(&[], "points");
        assert_eq!(0, compute_n_features_from_frame(&frame, "points").unwrap());
    }
}
