//! Property-based test generators using proptest.

use driftdb_core::{ObjectId, Operation};
use proptest::prelude::*;

/// Strategy for generating object IDs.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    prop::array::uniform16(any::<u8>()).prop_map(ObjectId::from_bytes)
}

/// Strategy for generating class names from a small fixed pool, so that
/// generated operations collide often.
pub fn class_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["Dog", "Cat", "Bird"]).prop_map(str::to_string)
}

/// Strategy for generating payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for generating puts and deletes over a small key space.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    let id = (0u8..8).prop_map(|key| ObjectId::from_bytes([key; 16]));
    prop_oneof![
        3 => (class_name_strategy(), id.clone(), payload_strategy())
            .prop_map(|(class, id, payload)| Operation::Put { class, id, payload }),
        1 => (class_name_strategy(), id).prop_map(|(class, id)| Operation::Delete { class, id }),
    ]
}

/// Strategy for generating transactions of 1 to 4 operations.
pub fn transaction_strategy() -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(), 1..4)
}
