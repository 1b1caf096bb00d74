//! Escrow contract
//!
//! CREATED → FUNDED → RELEASED. Cancel is refused only once the escrow is
//! RELEASED; cancelling again just records the newer refund hash. Each
//! transition records the external payment hash that caused it.

use crate::guard::Lifecycle;
use crate::record::{self, History, Record, Records, Stateful};
use crate::{timestamp, Result};
use chrono::{DateTime, Utc};
use ledger_core::{RangeIter, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Namespace of escrow records
pub const NAMESPACE: &str = "escrow";

closed_enum! {
    /// Escrow lifecycle
    EscrowStatus {
        Created => "CREATED",
        Funded => "FUNDED",
        Released => "RELEASED",
        Cancelled => "CANCELLED",
    }
}

closed_enum! {
    /// Guarded escrow operations
    EscrowOp {
        Fund => "fund",
        Release => "release",
        Cancel => "cancel",
    }
}

impl Lifecycle for EscrowStatus {
    type Op = EscrowOp;
    const ENTITY: &'static str = "escrow";

    fn allows(self, op: EscrowOp) -> bool {
        use EscrowStatus::*;

        match op {
            EscrowOp::Fund => self == Created,
            EscrowOp::Release => self == Funded,
            EscrowOp::Cancel => self != Released,
        }
    }
}

/// Escrow account holding a buyer's payment for a property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Escrow {
    pub escrow_id: String,
    pub property_id: String,
    pub buyer: String,
    pub seller: String,
    pub amount: Decimal,
    pub status: EscrowStatus,
    /// Hash of the last external payment (funding, release or refund)
    pub transaction_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Escrow {
    const DOC_TYPE: &'static str = "escrow";
    const ENTITY: &'static str = "escrow";
}

impl Stateful for Escrow {
    type Status = EscrowStatus;

    fn status(&self) -> EscrowStatus {
        self.status
    }
}

/// Open a new escrow in status CREATED
pub fn create(
    tx: &mut Transaction,
    escrow_id: &str,
    property_id: &str,
    buyer: &str,
    seller: &str,
    amount: Decimal,
) -> Result<Escrow> {
    record::require_id("escrowId", escrow_id)?;
    record::require_id("propertyId", property_id)?;
    record::require_id("buyer", buyer)?;
    record::require_id("seller", seller)?;
    record::require_positive("amount", amount)?;
    record::ensure_absent::<Escrow>(tx, escrow_id)?;

    let now = timestamp::resolve(tx)?;
    let escrow = Escrow {
        escrow_id: escrow_id.to_string(),
        property_id: property_id.to_string(),
        buyer: buyer.to_string(),
        seller: seller.to_string(),
        amount,
        status: EscrowStatus::Created,
        transaction_hash: String::new(),
        created_at: now,
        updated_at: now,
    };
    record::store(tx, escrow_id, &escrow)?;

    tracing::info!(escrow_id, property_id, %amount, "Escrow created");
    Ok(escrow)
}

/// Fetch an escrow
pub fn get(tx: &mut Transaction, escrow_id: &str) -> Result<Escrow> {
    record::load(tx, escrow_id)
}

/// Whether an escrow exists
pub fn exists(tx: &mut Transaction, escrow_id: &str) -> Result<bool> {
    record::exists::<Escrow>(tx, escrow_id)
}

/// Mark the escrow funded by the payment `tx_hash`
pub fn fund(tx: &mut Transaction, escrow_id: &str, tx_hash: &str) -> Result<Escrow> {
    settle(tx, escrow_id, EscrowOp::Fund, EscrowStatus::Funded, tx_hash)
}

/// Release the funds to the seller
pub fn release(tx: &mut Transaction, escrow_id: &str, tx_hash: &str) -> Result<Escrow> {
    settle(tx, escrow_id, EscrowOp::Release, EscrowStatus::Released, tx_hash)
}

/// Cancel the escrow, `tx_hash` being the refund payment
pub fn cancel(tx: &mut Transaction, escrow_id: &str, tx_hash: &str) -> Result<Escrow> {
    settle(tx, escrow_id, EscrowOp::Cancel, EscrowStatus::Cancelled, tx_hash)
}

fn settle(
    tx: &mut Transaction,
    escrow_id: &str,
    op: EscrowOp,
    target: EscrowStatus,
    tx_hash: &str,
) -> Result<Escrow> {
    record::require_id("txHash", tx_hash)?;
    record::transition::<Escrow, _>(tx, escrow_id, op, |escrow, now| {
        escrow.status = target;
        escrow.transaction_hash = tx_hash.to_string();
        escrow.updated_at = now;
        Ok(())
    })
}

/// Every escrow, in id order
pub fn all(tx: &Transaction) -> Result<Records<RangeIter, Escrow>> {
    record::all(tx)
}

/// Version history of an escrow
pub fn history(tx: &Transaction, escrow_id: &str) -> Result<History<Escrow>> {
    record::history(tx, escrow_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::ClosedEnum;

    #[test]
    fn test_guard_table() {
        use EscrowStatus::*;

        let allowed = [
            (EscrowOp::Fund, vec![Created]),
            (EscrowOp::Release, vec![Funded]),
            (EscrowOp::Cancel, vec![Created, Funded, Cancelled]),
        ];

        for (op, from) in allowed {
            for status in EscrowStatus::ALL {
                assert_eq!(
                    status.allows(op),
                    from.contains(status),
                    "{} from {}",
                    op,
                    status
                );
            }
        }
    }

    #[test]
    fn test_released_is_final() {
        for op in EscrowOp::ALL {
            assert!(!EscrowStatus::Released.allows(*op));
        }
    }

    #[test]
    fn test_cancelled_only_cancels_again() {
        assert!(EscrowStatus::Cancelled.allows(EscrowOp::Cancel));
        assert!(!EscrowStatus::Cancelled.allows(EscrowOp::Fund));
        assert!(!EscrowStatus::Cancelled.allows(EscrowOp::Release));
    }
}
