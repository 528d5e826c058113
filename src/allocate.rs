// src/allocate.rs

use crate::catalog::BranchId;
use crate::dialect::DocumentId;
use crate::error::PipelineError;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Request for invoice numbers: one branch invoice from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub branch: BranchId,
    pub document: DocumentId,
    /// Position of the document in the batch.
    pub document_index: usize,
    /// Numbers this invoice consumes.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub branch: BranchId,
    pub document: DocumentId,
    pub first: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub assignments: Vec<Assignment>,
    pub consumed: u64,
    /// Seed for the next batch: `seed + consumed`.
    pub next: u64,
}

impl Allocation {
    pub fn number_for(&self, branch: &BranchId, document: &DocumentId) -> Option<u64> {
        self.assignments
            .iter()
            .find(|a| &a.branch == branch && &a.document == document)
            .map(|a| a.first)
    }
}

/// Allocation state for one run. Numbers only move forward.
#[derive(Debug)]
pub struct InvoiceNumberLedger {
    seed: u64,
    next: u64,
    assigned: BTreeMap<(BranchId, DocumentId), u64>,
}

impl InvoiceNumberLedger {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            next: seed,
            assigned: BTreeMap::new(),
        }
    }

    /// Hands out the next `size` numbers; a second claim for the same branch
    /// and document is an `AllocationConflict`.
    pub fn assign(&mut self, claim: &Claim) -> Result<Assignment, PipelineError> {
        let key = (claim.branch.clone(), claim.document.clone());
        if self.assigned.contains_key(&key) {
            return Err(PipelineError::AllocationConflict {
                branch: claim.branch.clone(),
                document: claim.document.clone(),
            });
        }
        let first = self.next;
        self.next += claim.size;
        self.assigned.insert(key, first);
        debug!(branch = %claim.branch, document = %claim.document, number = first, "Invoice number assigned");
        Ok(Assignment {
            branch: claim.branch.clone(),
            document: claim.document.clone(),
            first,
            size: claim.size,
        })
    }

    pub fn consumed(&self) -> u64 {
        self.next - self.seed
    }

    pub fn next_available(&self) -> u64 {
        self.next
    }
}

/// Numbers claims in order: priority branches in declared order, then the
/// remaining branches by id; documents in batch order within a branch.
pub fn allocate(
    seed: u64,
    claims: &[Claim],
    priority: &[BranchId],
) -> Result<Allocation, PipelineError> {
    let rank = |branch: &BranchId| priority.iter().position(|p| p == branch);
    let mut ordered: Vec<&Claim> = claims.iter().collect();
    ordered.sort_by(|a, b| {
        let by_branch = match (rank(&a.branch), rank(&b.branch)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.branch.cmp(&b.branch),
        };
        by_branch.then(a.document_index.cmp(&b.document_index))
    });

    let mut ledger = InvoiceNumberLedger::new(seed);
    let assignments = ordered
        .into_iter()
        .map(|claim| ledger.assign(claim))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        seed,
        invoices = assignments.len(),
        consumed = ledger.consumed(),
        next = ledger.next_available(),
        "Invoice numbers allocated"
    );
    Ok(Allocation {
        assignments,
        consumed: ledger.consumed(),
        next: ledger.next_available(),
    })
}
