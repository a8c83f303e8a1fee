//! Vector index infrastructure.
//!
//! A LanceDB collection holding `{id, persona_id, user_id, vector}` per
//! memory. The Arrow schema lives in `schema`; the `VectorIndex`
//! implementation in `lance`.

pub mod lance;
pub mod schema;
