//! Executable persistence seam.
//!
//! The reservation system owns executables; the executor only needs to list them, read
//! one and write back state transitions. [`MemoryExecutableStore`] keeps them in
//! declaration order for tests and for embedding applications without a database.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::executable::{Executable, ExecutableId, ExecutableKind, Slot};
use crate::error::{BrokerError, Result};

pub trait ExecutableStore: Send + Sync {
    /// All executables in declaration order
    fn list(&self) -> Vec<Executable>;

    fn get(&self, id: ExecutableId) -> Option<Executable>;

    /// Persist a state transition of an existing executable
    fn update(&self, executable: &Executable) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryExecutableStore {
    executables: RwLock<BTreeMap<ExecutableId, Executable>>,
    next_id: AtomicU64,
}

impl MemoryExecutableStore {
    pub fn new() -> Self {
        Self {
            executables: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Declare a new executable; ids follow declaration order
    pub fn insert(
        &self,
        slot: Slot,
        kind: ExecutableKind,
        children: impl IntoIterator<Item = ExecutableId>,
    ) -> ExecutableId {
        let id = ExecutableId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let executable = Executable::new(id, slot, kind).with_children(children);
        self.executables.write().insert(id, executable);
        id
    }

    /// Insert or replace a fully built executable
    pub fn put(&self, executable: Executable) {
        let next = executable.id.0 + 1;
        self.next_id.fetch_max(next, Ordering::SeqCst);
        self.executables.write().insert(executable.id, executable);
    }

    /// Change the persisted specification of an executable
    pub fn update_specification(&self, id: ExecutableId, kind: ExecutableKind) -> Result<()> {
        let mut executables = self.executables.write();
        let executable = executables
            .get_mut(&id)
            .ok_or(BrokerError::UnknownExecutable(id))?;
        executable.update_kind(kind);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.executables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executables.read().is_empty()
    }
}

impl ExecutableStore for MemoryExecutableStore {
    fn list(&self) -> Vec<Executable> {
        self.executables.read().values().cloned().collect()
    }

    fn get(&self, id: ExecutableId) -> Option<Executable> {
        self.executables.read().get(&id).cloned()
    }

    fn update(&self, executable: &Executable) -> Result<()> {
        let mut executables = self.executables.write();
        match executables.get_mut(&executable.id) {
            Some(stored) => {
                *stored = executable.clone();
                Ok(())
            }
            None => Err(BrokerError::UnknownExecutable(executable.id)),
        }
    }
}
