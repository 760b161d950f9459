//! Materialized object state.

use crate::changeset::{Operation, StoredObject};
use crate::object::ObjectId;
use std::collections::BTreeMap;

/// The objects of a database at one version, grouped by class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ObjectState {
    classes: BTreeMap<String, BTreeMap<ObjectId, Vec<u8>>>,
}

impl ObjectState {
    pub(crate) fn from_objects(objects: &[StoredObject]) -> Self {
        let mut state = Self::default();
        for object in objects {
            state
                .classes
                .entry(object.class.clone())
                .or_default()
                .insert(object.id, object.payload.clone());
        }
        state
    }

    pub(crate) fn apply(&mut self, operation: &Operation) {
        match operation {
            Operation::Put { class, id, payload } => {
                self.classes
                    .entry(class.clone())
                    .or_default()
                    .insert(*id, payload.clone());
            }
            Operation::Delete { class, id } => {
                if let Some(objects) = self.classes.get_mut(class) {
                    objects.remove(id);
                    if objects.is_empty() {
                        self.classes.remove(class);
                    }
                }
            }
        }
    }

    pub(crate) fn get(&self, class: &str, id: &ObjectId) -> Option<&Vec<u8>> {
        self.classes.get(class).and_then(|objects| objects.get(id))
    }

    pub(crate) fn count(&self, class: &str) -> usize {
        self.classes.get(class).map_or(0, BTreeMap::len)
    }

    pub(crate) fn list(&self, class: &str) -> Vec<(ObjectId, Vec<u8>)> {
        self.classes
            .get(class)
            .map(|objects| {
                objects
                    .iter()
                    .map(|(id, payload)| (*id, payload.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn classes(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    pub(crate) fn total(&self) -> usize {
        self.classes.values().map(BTreeMap::len).sum()
    }

    pub(crate) fn to_objects(&self) -> Vec<StoredObject> {
        self.classes
            .iter()
            .flat_map(|(class, objects)| {
                objects.iter().map(move |(id, payload)| StoredObject {
                    class: class.clone(),
                    id: *id,
                    payload: payload.clone(),
                })
            })
            .collect()
    }
}
