#![forbid(unsafe_code)]

use ehr_kernel_contracts::{ContractViolation, RecordError, Validate};
use ehr_storage::ledger::{Committed, TransactionRunner};
use tracing::warn;

use crate::dispatch::{OperationOutput, RecordDispatcher};

pub const RETRY_MAX_ATTEMPTS_LIMIT: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
}

impl RetryPolicy {
    pub fn mvp_v1() -> Self {
        Self { max_attempts: 3 }
    }

    pub fn new(max_attempts: u8) -> Result<Self, ContractViolation> {
        let policy = Self { max_attempts };
        policy.validate()?;
        Ok(policy)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

impl Validate for RetryPolicy {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !(1..=RETRY_MAX_ATTEMPTS_LIMIT).contains(&self.max_attempts) {
            return Err(ContractViolation::InvalidValue {
                field: "retry_policy.max_attempts",
                reason: "must be within 1..=16",
            });
        }
        Ok(())
    }
}

/// Runs one operation to commit, re-running it from scratch in a fresh transaction whenever
/// the platform rejects the commit with `Conflict`.
///
/// Each attempt re-reads the current document, so a retried append lands after the write it
/// lost to. Every other error is returned on first sight.
pub fn invoke_with_conflict_retry<R: TransactionRunner>(
    runner: &R,
    dispatcher: &RecordDispatcher,
    operation: &str,
    args: &[String],
    policy: RetryPolicy,
) -> Result<Committed<OperationOutput>, RecordError> {
    let mut attempt: u8 = 1;
    loop {
        match runner.run_transaction(|ctx| dispatcher.invoke(ctx, operation, args)) {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "commit conflict, retrying operation"
                );
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}
