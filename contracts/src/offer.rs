//! Offer contract
//!
//! A buyer's offer on a property moves PENDING → ACCEPTED → ADMIN_VERIFIED →
//! COMPLETED. The seller may reject a pending offer; either party may cancel
//! until the offer completes.

use crate::guard::{ClosedEnum, Lifecycle};
use crate::record::{self, History, Record, Records, Stateful};
use crate::{timestamp, Result};
use chrono::{DateTime, Utc};
use ledger_core::{QueryIter, RangeIter, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Namespace of offer records
pub const NAMESPACE: &str = "offer";

closed_enum! {
    /// Offer lifecycle
    OfferStatus {
        Pending => "PENDING",
        Accepted => "ACCEPTED",
        Rejected => "REJECTED",
        AdminVerified => "ADMIN_VERIFIED",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

closed_enum! {
    /// Guarded offer operations
    OfferOp {
        Accept => "accept",
        Reject => "reject",
        AdminVerify => "admin-verify",
        Complete => "complete",
        Cancel => "cancel",
    }
}

impl Lifecycle for OfferStatus {
    type Op = OfferOp;
    const ENTITY: &'static str = "offer";

    fn allows(self, op: OfferOp) -> bool {
        use OfferStatus::*;

        match op {
            OfferOp::Accept | OfferOp::Reject => self == Pending,
            OfferOp::AdminVerify => self == Accepted,
            OfferOp::Complete => self == AdminVerified,
            OfferOp::Cancel => self != Completed,
        }
    }
}

/// Purchase offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub offer_id: String,
    pub property_id: String,
    pub buyer_id: String,
    pub buyer_name: String,
    pub seller_id: String,
    pub seller_name: String,
    pub offer_amount: Decimal,
    pub status: OfferStatus,
    pub message: String,
    pub admin_verified: bool,
    pub admin_id: String,
    pub verified_at: Option<DateTime<Utc>>,
    /// Hash of the settlement payment on the external network
    pub external_tx_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Offer {
    const DOC_TYPE: &'static str = "offer";
    const ENTITY: &'static str = "offer";
}

impl Stateful for Offer {
    type Status = OfferStatus;

    fn status(&self) -> OfferStatus {
        self.status
    }
}

/// Parties and terms of a new offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOffer {
    pub offer_id: String,
    pub property_id: String,
    pub buyer_id: String,
    pub buyer_name: String,
    pub seller_id: String,
    pub seller_name: String,
    pub offer_amount: Decimal,
    pub message: String,
}

/// Submit a new offer in status PENDING
pub fn create(tx: &mut Transaction, new: NewOffer) -> Result<Offer> {
    record::require_id("offerId", &new.offer_id)?;
    record::require_id("propertyId", &new.property_id)?;
    record::require_id("buyerId", &new.buyer_id)?;
    record::require_id("sellerId", &new.seller_id)?;
    record::require_positive("offerAmount", new.offer_amount)?;
    record::ensure_absent::<Offer>(tx, &new.offer_id)?;

    let now = timestamp::resolve(tx)?;
    let offer = Offer {
        offer_id: new.offer_id,
        property_id: new.property_id,
        buyer_id: new.buyer_id,
        buyer_name: new.buyer_name,
        seller_id: new.seller_id,
        seller_name: new.seller_name,
        offer_amount: new.offer_amount,
        status: OfferStatus::Pending,
        message: new.message,
        admin_verified: false,
        admin_id: String::new(),
        verified_at: None,
        external_tx_hash: String::new(),
        created_at: now,
        updated_at: now,
    };
    record::store(tx, &offer.offer_id, &offer)?;

    tracing::info!(
        offer_id = %offer.offer_id,
        property_id = %offer.property_id,
        amount = %offer.offer_amount,
        "Offer created"
    );
    Ok(offer)
}

/// Fetch an offer
pub fn get(tx: &mut Transaction, offer_id: &str) -> Result<Offer> {
    record::load(tx, offer_id)
}

/// Whether an offer exists
pub fn exists(tx: &mut Transaction, offer_id: &str) -> Result<bool> {
    record::exists::<Offer>(tx, offer_id)
}

/// Seller accepts a pending offer
pub fn accept(tx: &mut Transaction, offer_id: &str) -> Result<Offer> {
    move_to(tx, offer_id, OfferOp::Accept, OfferStatus::Accepted)
}

/// Seller rejects a pending offer
pub fn reject(tx: &mut Transaction, offer_id: &str) -> Result<Offer> {
    move_to(tx, offer_id, OfferOp::Reject, OfferStatus::Rejected)
}

/// Admin confirms an accepted offer against its external settlement payment
pub fn admin_verify(
    tx: &mut Transaction,
    offer_id: &str,
    admin_id: &str,
    external_tx_hash: &str,
) -> Result<Offer> {
    record::require_id("adminId", admin_id)?;

    record::transition::<Offer, _>(tx, offer_id, OfferOp::AdminVerify, |offer, now| {
        offer.status = OfferStatus::AdminVerified;
        offer.admin_verified = true;
        offer.admin_id = admin_id.to_string();
        offer.verified_at = Some(now);
        offer.external_tx_hash = external_tx_hash.to_string();
        offer.updated_at = now;
        Ok(())
    })
}

/// Close an admin-verified offer
pub fn complete(tx: &mut Transaction, offer_id: &str) -> Result<Offer> {
    move_to(tx, offer_id, OfferOp::Complete, OfferStatus::Completed)
}

/// Withdraw an offer that has not completed
pub fn cancel(tx: &mut Transaction, offer_id: &str) -> Result<Offer> {
    move_to(tx, offer_id, OfferOp::Cancel, OfferStatus::Cancelled)
}

fn move_to(
    tx: &mut Transaction,
    offer_id: &str,
    op: OfferOp,
    target: OfferStatus,
) -> Result<Offer> {
    record::transition::<Offer, _>(tx, offer_id, op, |offer, now| {
        offer.status = target;
        offer.updated_at = now;
        Ok(())
    })
}

/// Offers on a property
pub fn by_property(tx: &Transaction, property_id: &str) -> Result<Records<QueryIter, Offer>> {
    record::find_by(tx, "propertyId", property_id)
}

/// Offers made by a buyer
pub fn by_buyer(tx: &Transaction, buyer_id: &str) -> Result<Records<QueryIter, Offer>> {
    record::find_by(tx, "buyerId", buyer_id)
}

/// Offers received by a seller
pub fn by_seller(tx: &Transaction, seller_id: &str) -> Result<Records<QueryIter, Offer>> {
    record::find_by(tx, "sellerId", seller_id)
}

/// Offers in a given status
pub fn by_status(tx: &Transaction, status: OfferStatus) -> Result<Records<QueryIter, Offer>> {
    record::find_by(tx, "status", status.as_str())
}

/// Accepted offers waiting for an admin
pub fn pending_admin_verifications(tx: &Transaction) -> Result<Records<QueryIter, Offer>> {
    by_status(tx, OfferStatus::Accepted)
}

/// Every offer, in id order
pub fn all(tx: &Transaction) -> Result<Records<RangeIter, Offer>> {
    record::all(tx)
}

/// Version history of an offer
pub fn history(tx: &Transaction, offer_id: &str) -> Result<History<Offer>> {
    record::history(tx, offer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_table() {
        use OfferStatus::*;

        let allowed = [
            (OfferOp::Accept, vec![Pending]),
            (OfferOp::Reject, vec![Pending]),
            (OfferOp::AdminVerify, vec![Accepted]),
            (OfferOp::Complete, vec![AdminVerified]),
            (
                OfferOp::Cancel,
                vec![Pending, Accepted, Rejected, AdminVerified, Cancelled],
            ),
        ];

        for (op, from) in allowed {
            for status in OfferStatus::ALL {
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
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&OfferStatus::AdminVerified).unwrap(),
            "\"ADMIN_VERIFIED\""
        );
        assert_eq!(
            "ADMIN_VERIFIED".parse::<OfferStatus>().unwrap(),
            OfferStatus::AdminVerified
        );
    }
}
