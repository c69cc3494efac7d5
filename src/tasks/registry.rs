use super::types::Task;

/// Insertion-ordered collection of tasks, keyed by the task's immutable id.
///
/// Order is the display order and nothing else; each task progresses
/// independently. `update` and `remove` tolerate missing ids because a
/// task can be removed while an async operation referencing it is still
/// in flight — that race is expected, not an error.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: Vec<Task>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { tasks: Vec::new() }
    }

    pub fn add(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn remove(&mut self, id: &uuid::Uuid) -> Option<Task> {
        let pos = self.tasks.iter().position(|t| t.id == *id)?;
        Some(self.tasks.remove(pos))
    }

    pub fn get(&self, id: &uuid::Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == *id)
    }

    /// Mutate one task in place. Returns `None` without running the
    /// closure when the id is gone.
    pub fn update<F, R>(&mut self, id: &uuid::Uuid, f: F) -> Option<R>
    where
        F: FnOnce(&mut Task) -> R,
    {
        self.tasks.iter_mut().find(|t| t.id == *id).map(f)
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
