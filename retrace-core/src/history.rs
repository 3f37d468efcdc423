//! The persisted, linear undo/redo history.
//!
//! The store is fully described by `(operations, position)`: operations with an
//! index below `position` are applied, the rest form the redo tail. Every
//! mutation is written back to the project's history database before the call
//! returns.

use crate::context::Context;
use crate::delta::{self, Direction};
use crate::error::{Error, Result};
use crate::models::{HistoryEntry, HistorySummary, Operation, StepOutcome};
use crate::storage::Storage;
use tracing::{error, info, warn};

pub struct HistoryStore {
    storage: Storage,
    operations: Vec<Operation>,
    position: usize,
}

impl HistoryStore {
    /// Open the history for a project, creating the database on first use.
    pub fn open(ctx: &Context) -> Result<Self> {
        if let Some(parent) = ctx.history_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_storage(Storage::new(&ctx.history_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_storage(Storage::in_memory()?)
    }

    fn with_storage(storage: Storage) -> Result<Self> {
        let (operations, position) = storage.load()?;
        Ok(Self {
            storage,
            operations,
            position,
        })
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.position > 0
    }

    pub fn can_redo(&self) -> bool {
        self.position < self.operations.len()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operation(&self, index: usize) -> Result<&Operation> {
        self.operations
            .get(index)
            .ok_or(Error::OperationNotFound(index))
    }

    fn persist(&mut self) -> Result<()> {
        self.storage.save(&self.operations, self.position)
    }

    /// Record a finished operation.
    ///
    /// With `append` the redo tail is discarded and the operation becomes the
    /// newest applied entry. Without it, the operation replaces the entry at
    /// `position - 1` and the position is unchanged. If the history cannot be
    /// saved, the in-memory state is left as it was.
    pub fn record(&mut self, operation: Operation, append: bool) -> Result<()> {
        if append {
            let previous_position = self.position;
            let tail = self.operations.split_off(self.position);
            if !tail.is_empty() {
                info!("Discarding {} redoable operation(s)", tail.len());
            }
            info!("Recording operation '{}'", operation.description);
            self.operations.push(operation);
            self.position = self.operations.len();

            if let Err(e) = self.persist() {
                self.operations.pop();
                self.operations.extend(tail);
                self.position = previous_position;
                return Err(e);
            }
        } else {
            let Some(index) = self.position.checked_sub(1) else {
                return Err(Error::InvalidOperation(
                    "no applied operation to amend".to_string(),
                ));
            };
            info!(
                "Replacing operation '{}' with '{}'",
                self.operations[index].description, operation.description
            );
            let previous = std::mem::replace(&mut self.operations[index], operation);

            if let Err(e) = self.persist() {
                self.operations[index] = previous;
                return Err(e);
            }
        }

        Ok(())
    }

    pub fn undo(&mut self, steps: i64) -> Result<StepOutcome> {
        self.step(Direction::Reverse, steps)
    }

    pub fn redo(&mut self, steps: i64) -> Result<StepOutcome> {
        self.step(Direction::Forward, steps)
    }

    fn step(&mut self, direction: Direction, steps: i64) -> Result<StepOutcome> {
        let verb = direction.as_str();
        if steps <= 0 {
            return Ok(StepOutcome {
                count: 0,
                message: format!("Nothing to {}: steps must be positive (got {})", verb, steps),
            });
        }

        let available = match direction {
            Direction::Reverse => self.position,
            Direction::Forward => self.operations.len() - self.position,
        };
        if available == 0 {
            return Ok(StepOutcome {
                count: 0,
                message: format!("Nothing to {}", verb),
            });
        }

        let requested = usize::try_from(steps).unwrap_or(usize::MAX);
        let count = requested.min(available);
        let mut descriptions = Vec::with_capacity(count);

        for completed in 0..count {
            let index = match direction {
                Direction::Reverse => self.position - 1,
                Direction::Forward => self.position,
            };

            if let Err(source) = replay(&self.operations[index], direction) {
                let description = self.operations[index].description.clone();
                if let Err(e) = self.persist() {
                    error!(
                        "Failed to save history position after '{}' failed: {}",
                        description, e
                    );
                }
                return Err(Error::Replay {
                    direction: verb,
                    description,
                    completed,
                    source: Box::new(source),
                });
            }

            match direction {
                Direction::Reverse => self.position -= 1,
                Direction::Forward => self.position += 1,
            }
            info!("{} '{}'", verb, self.operations[index].description);
            descriptions.push(self.operations[index].description.clone());
        }

        self.persist()?;

        let done = match direction {
            Direction::Reverse => "Undone",
            Direction::Forward => "Redone",
        };
        let mut message = format!(
            "{} {} operation(s): {}",
            done,
            count,
            descriptions.join(", ")
        );
        if requested > count {
            message.push_str(&format!(" (requested {}, only {} available)", requested, count));
        }

        Ok(StepOutcome { count, message })
    }

    pub fn history(&self) -> HistorySummary {
        let operations = self
            .operations
            .iter()
            .enumerate()
            .map(|(index, operation)| HistoryEntry {
                index,
                id: operation.id,
                description: operation.description.clone(),
                timestamp: operation.timestamp,
                delta_count: operation.deltas.len(),
                applied: index < self.position,
                current: index + 1 == self.position,
            })
            .collect();

        HistorySummary {
            operations,
            current_position: self.position,
            total_operations: self.operations.len(),
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
        }
    }

    /// Forget all history. Failures are logged and reported as `false`.
    pub fn clear_history(&mut self) -> bool {
        let previous = std::mem::take(&mut self.operations);
        let previous_position = self.position;
        self.position = 0;

        match self.persist() {
            Ok(()) => {
                info!("Cleared {} operation(s) from history", previous.len());
                true
            }
            Err(e) => {
                error!("Failed to clear history: {}", e);
                self.operations = previous;
                self.position = previous_position;
                false
            }
        }
    }
}

/// Apply one operation's deltas in `direction`: list order forward, exact
/// reverse order backward. A failing delta rolls back the deltas of this
/// operation that were already applied.
fn replay(operation: &Operation, direction: Direction) -> Result<()> {
    let ordered: Vec<_> = match direction {
        Direction::Forward => operation.deltas.iter().collect(),
        Direction::Reverse => operation.deltas.iter().rev().collect(),
    };

    for (applied, delta) in ordered.iter().enumerate() {
        let Err(source) = delta::apply(delta, direction) else {
            continue;
        };

        if applied > 0 {
            warn!(
                "Rolling back {} delta(s) of '{}' after failure on {:?}",
                applied, operation.description, delta.target_path
            );
        }

        for done in ordered[..applied].iter().rev() {
            if let Err(rollback) = delta::apply(done, direction.opposite()) {
                error!(
                    "Rollback of '{}' failed on {:?}: {}; history may be inconsistent",
                    operation.description, done.target_path, rollback
                );
                return Err(Error::InconsistentState {
                    description: operation.description.clone(),
                    source: Box::new(source),
                });
            }
        }

        return Err(source);
    }

    Ok(())
}
