pub type Index = u32;
pub type DocId = u32;
pub type IndexValueVec = Vec<(Index, f32)>;
pub type LabelSet = hashbrown::HashSet<Index>;

pub use crate::data::{ClassificationResult, DataSet, SparsePoint};
pub use crate::error::{Error, Result};
pub use crate::frame::{Field, FieldType, Frame, Record, Schema, Value};
pub use crate::pipeline::{Broadcast, ClassificationPipeline, PointClassifier};

pub mod data;
pub mod error;
pub mod frame;
pub mod index;
pub mod pipeline;
