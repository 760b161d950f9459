//! Read-only snapshots and write handles over the object state.

use crate::changeset::Operation;
use crate::error::{CoreError, CoreResult};
use crate::object::ObjectId;
use crate::state::ObjectState;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Class-level reads shared by every view.
pub trait ReadView {
    /// Returns the payload of an object, if present.
    fn get(&self, class: &str, id: ObjectId) -> Option<Vec<u8>>;

    /// Returns the number of objects in a class.
    fn count(&self, class: &str) -> usize;

    /// Returns every object of a class, ordered by id.
    fn list(&self, class: &str) -> Vec<(ObjectId, Vec<u8>)>;

    /// Returns the names of the non-empty classes.
    fn classes(&self) -> Vec<String>;

    /// Returns the number of objects across all classes.
    fn total(&self) -> usize {
        self.classes().iter().map(|class| self.count(class)).sum()
    }
}

/// A frozen snapshot of a database at one commit.
///
/// Has no mutating methods. Cheap to create: it shares the state it was taken
/// from, and later commits never change what it sees.
#[derive(Debug)]
pub struct FrozenView {
    state: Arc<ObjectState>,
    version: u64,
    server_version: u64,
}

impl FrozenView {
    pub(crate) fn new(state: Arc<ObjectState>, version: u64, server_version: u64) -> Self {
        Self {
            state,
            version,
            server_version,
        }
    }

    /// Local commit version the snapshot was taken at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Server history version integrated at the time of the snapshot.
    #[must_use]
    pub fn server_version(&self) -> u64 {
        self.server_version
    }
}

impl ReadView for FrozenView {
    fn get(&self, class: &str, id: ObjectId) -> Option<Vec<u8>> {
        self.state.get(class, &id).cloned()
    }

    fn count(&self, class: &str) -> usize {
        self.state.count(class)
    }

    fn list(&self, class: &str) -> Vec<(ObjectId, Vec<u8>)> {
        self.state.list(class)
    }

    fn classes(&self) -> Vec<String> {
        self.state.classes()
    }

    fn total(&self) -> usize {
        self.state.total()
    }
}

/// A live write handle inside a transaction.
///
/// Writes are staged on top of the committed state and become visible to
/// the handle's own reads immediately. They are committed together when the
/// transaction closure returns `Ok` and dropped otherwise.
#[derive(Debug)]
pub struct MutableView<'a> {
    base: &'a ObjectState,
    staged: BTreeMap<(String, ObjectId), Option<Vec<u8>>>,
    operations: Vec<Operation>,
}

impl<'a> MutableView<'a> {
    pub(crate) fn new(base: &'a ObjectState) -> Self {
        Self {
            base,
            staged: BTreeMap::new(),
            operations: Vec::new(),
        }
    }

    /// Inserts or overwrites an object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an empty class name.
    pub fn put(&mut self, class: &str, id: ObjectId, payload: Vec<u8>) -> CoreResult<()> {
        check_class(class)?;
        self.staged
            .insert((class.to_string(), id), Some(payload.clone()));
        self.operations.push(Operation::Put {
            class: class.to_string(),
            id,
            payload,
        });
        Ok(())
    }

    /// Removes an object. Removing a missing object is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an empty class name.
    pub fn delete(&mut self, class: &str, id: ObjectId) -> CoreResult<()> {
        check_class(class)?;
        self.staged.insert((class.to_string(), id), None);
        self.operations.push(Operation::Delete {
            class: class.to_string(),
            id,
        });
        Ok(())
    }

    /// Removes every object of a class.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an empty class name.
    pub fn delete_all(&mut self, class: &str) -> CoreResult<usize> {
        let ids: Vec<ObjectId> = self.list(class).into_iter().map(|(id, _)| id).collect();
        for id in &ids {
            self.delete(class, *id)?;
        }
        Ok(ids.len())
    }

    /// Number of operations staged so far.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.operations.len()
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}

fn check_class(class: &str) -> CoreResult<()> {
    if class.is_empty() {
        return Err(CoreError::invalid_operation("class name must not be empty"));
    }
    Ok(())
}

impl ReadView for MutableView<'_> {
    fn get(&self, class: &str, id: ObjectId) -> Option<Vec<u8>> {
        match self.staged.get(&(class.to_string(), id)) {
            Some(staged) => staged.clone(),
            None => self.base.get(class, &id).cloned(),
        }
    }

    fn count(&self, class: &str) -> usize {
        self.list(class).len()
    }

    fn list(&self, class: &str) -> Vec<(ObjectId, Vec<u8>)> {
        let mut objects: BTreeMap<ObjectId, Vec<u8>> = self.base.list(class).into_iter().collect();
        for ((staged_class, id), value) in &self.staged {
            if staged_class != class {
                continue;
            }
            match value {
                Some(payload) => {
                    objects.insert(*id, payload.clone());
                }
                None => {
                    objects.remove(id);
                }
            }
        }
        objects.into_iter().collect()
    }

    fn classes(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.base.classes().into_iter().collect();
        names.extend(self.staged.keys().map(|(class, _)| class.clone()));
        names
            .into_iter()
            .filter(|class| self.count(class) > 0)
            .collect()
    }
}
