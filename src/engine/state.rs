//! Execution stages of a ledger movement
//!
//! ```text
//! RECEIVED → LOCKED → CONVERTED → FEE_COMPUTED → VALIDATED → MUTATED → JOURNALED → PUBLISHED → COMPLETED
//!                                      └──────────────┴──▶ REJECTED (no side effects)
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i16)]
pub enum ExecutionStage {
    Received = 0,
    /// Account row lock(s) held
    Locked = 10,
    Converted = 20,
    FeeComputed = 30,
    Validated = 40,
    /// Balance written inside the unit of work
    Mutated = 50,
    /// Unit committed: balance and journal are durable
    Journaled = 60,
    Published = 70,
    /// Terminal
    Completed = 100,
    /// Terminal: rejected before mutation
    Rejected = -10,
}

impl ExecutionStage {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStage::Completed | ExecutionStage::Rejected)
    }

    /// Ledger change is durable; later failures are tolerated without rollback
    #[inline]
    pub fn is_durable(&self) -> bool {
        matches!(
            self,
            ExecutionStage::Journaled | ExecutionStage::Published | ExecutionStage::Completed
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStage::Received => "RECEIVED",
            ExecutionStage::Locked => "LOCKED",
            ExecutionStage::Converted => "CONVERTED",
            ExecutionStage::FeeComputed => "FEE_COMPUTED",
            ExecutionStage::Validated => "VALIDATED",
            ExecutionStage::Mutated => "MUTATED",
            ExecutionStage::Journaled => "JOURNALED",
            ExecutionStage::Published => "PUBLISHED",
            ExecutionStage::Completed => "COMPLETED",
            ExecutionStage::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionStage::Completed.is_terminal());
        assert!(ExecutionStage::Rejected.is_terminal());
        assert!(!ExecutionStage::Journaled.is_terminal());
        assert!(!ExecutionStage::Received.is_terminal());
    }

    #[test]
    fn test_durable_after_journal() {
        assert!(!ExecutionStage::Mutated.is_durable());
        assert!(ExecutionStage::Journaled.is_durable());
        assert!(ExecutionStage::Published.is_durable());
        assert!(!ExecutionStage::Rejected.is_durable());
    }

    #[test]
    fn test_forward_order() {
        assert!(ExecutionStage::Locked < ExecutionStage::Converted);
        assert!(ExecutionStage::Validated < ExecutionStage::Mutated);
        assert_eq!(ExecutionStage::Journaled.id(), 60);
        assert_eq!(ExecutionStage::FeeComputed.to_string(), "FEE_COMPUTED");
    }
}
