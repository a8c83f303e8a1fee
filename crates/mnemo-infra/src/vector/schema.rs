//! Arrow schema for the memory vector collection.
//!
//! The collection stores identity and scope only; memory text stays in the
//! relational store. Arrow versions MUST match lancedb's transitive
//! dependency (57.3 for lancedb 0.26).

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

pub const ID_COLUMN: &str = "id";
pub const PERSONA_COLUMN: &str = "persona_id";
pub const USER_COLUMN: &str = "user_id";
pub const VECTOR_COLUMN: &str = "vector";

fn vector_item_field() -> Arc<Field> {
    Arc::new(Field::new("item", DataType::Float32, true))
}

/// Schema of the memory collection for vectors of length `dimension`.
pub fn memory_index_schema(dimension: i32) -> Schema {
    Schema::new(vec![
        Field::new(ID_COLUMN, DataType::Utf8, false),
        Field::new(PERSONA_COLUMN, DataType::Utf8, false),
        Field::new(USER_COLUMN, DataType::Int64, false),
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(vector_item_field(), dimension),
            false,
        ),
    ])
}

/// Vector length recorded in an existing collection's schema.
pub fn stored_dimension(schema: &Schema) -> Option<usize> {
    match schema.field_with_name(VECTOR_COLUMN).ok()?.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
        _ => None,
    }
}

pub(crate) fn item_field() -> Arc<Field> {
    vector_item_field()
}
