use crate::Transaction;
use serde::Serialize;

/// Pending transactions in arrival order. A transaction is admitted only if
/// no structurally equal one is already waiting.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct TransactionPool(Vec<Transaction>);

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `tx` was added, `false` if it was already present.
    pub fn admit(&mut self, tx: Transaction) -> bool {
        if self.0.contains(&tx) {
            return false;
        }
        self.0.push(tx);
        true
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.0
    }

    /// Empties the pool, handing back what it held.
    pub fn drain(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
