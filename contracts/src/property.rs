//! Property contract
//!
//! Registered properties start in PENDING_VERIFICATION and are listed after a
//! verifier approves them. SOLD is reached only through [`transfer`], which
//! writes the property and its transfer record in one write set, so a sold
//! property always has a matching `TXN_<id>` record in the same namespace.

use crate::guard::{self, ClosedEnum, Lifecycle};
use crate::record::{self, History, Record, Records, Stateful};
use crate::{timestamp, Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{QueryIter, RangeIter, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace of property and transfer records
pub const NAMESPACE: &str = "property";

/// Key prefix of transfer records
pub const TRANSFER_PREFIX: &str = "TXN_";

closed_enum! {
    /// Property lifecycle
    PropertyStatus {
        PendingVerification => "PENDING_VERIFICATION",
        Verified => "VERIFIED",
        Available => "AVAILABLE",
        UnderContract => "UNDER_CONTRACT",
        Sold => "SOLD",
    }
}

closed_enum! {
    /// Kind of land
    PropertyType {
        Residential => "RESIDENTIAL",
        Commercial => "COMMERCIAL",
        Agricultural => "AGRICULTURAL",
    }
}

closed_enum! {
    /// State of an ownership transfer
    TransferStatus {
        Pending => "PENDING",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

/// Guarded property operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyOp {
    Verify,
    UpdatePrice,
    Transfer,
    UpdateStatus(PropertyStatus),
    AddDocument,
}

impl fmt::Display for PropertyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyOp::Verify => f.write_str("verify"),
            PropertyOp::UpdatePrice => f.write_str("update-price"),
            PropertyOp::Transfer => f.write_str("transfer"),
            PropertyOp::UpdateStatus(target) => write!(f, "move to {}", target),
            PropertyOp::AddDocument => f.write_str("add-document"),
        }
    }
}

impl Lifecycle for PropertyStatus {
    type Op = PropertyOp;
    const ENTITY: &'static str = "property";

    fn allows(self, op: PropertyOp) -> bool {
        use PropertyStatus::*;

        match op {
            PropertyOp::Verify => self == PendingVerification,
            PropertyOp::UpdatePrice | PropertyOp::AddDocument => self != Sold,
            PropertyOp::Transfer => matches!(self, Verified | Available | UnderContract),
            // SOLD only via transfer, PENDING_VERIFICATION only at registration
            PropertyOp::UpdateStatus(target) => matches!(
                (self, target),
                (Verified, Available)
                    | (Available, UnderContract)
                    | (Available, Verified)
                    | (UnderContract, Available)
            ),
        }
    }
}

/// Registered land property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub property_id: String,
    pub owner: String,
    pub owner_name: String,
    pub location: String,
    pub area: Decimal,
    pub price: Decimal,
    pub status: PropertyStatus,
    pub property_type: PropertyType,
    pub description: String,
    /// Document references, in upload order
    pub documents: Vec<String>,
    pub verified_by: String,
    pub verified_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub views: u64,
    pub latitude: f64,
    pub longitude: f64,
}

impl Record for Property {
    const DOC_TYPE: &'static str = "property";
    const ENTITY: &'static str = "property";
}

impl Stateful for Property {
    type Status = PropertyStatus;

    fn status(&self) -> PropertyStatus {
        self.status
    }
}

/// Immutable record of an ownership transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub transaction_id: String,
    pub property_id: String,
    pub from_owner: String,
    pub to_owner: String,
    pub amount: Decimal,
    pub status: TransferStatus,
    #[serde(default)]
    pub escrow_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Record for TransferRecord {
    const DOC_TYPE: &'static str = "transaction";
    const ENTITY: &'static str = "transaction";
}

/// Attributes of a property being registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProperty {
    pub property_id: String,
    pub owner: String,
    pub owner_name: String,
    pub location: String,
    pub area: Decimal,
    pub price: Decimal,
    pub property_type: PropertyType,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Ledger key of a transfer record
pub fn transfer_key(transaction_id: &str) -> String {
    format!("{}{}", TRANSFER_PREFIX, transaction_id)
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(Error::Validation(format!(
            "latitude {} outside [-90, 90]",
            latitude
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(Error::Validation(format!(
            "longitude {} outside [-180, 180]",
            longitude
        )));
    }
    Ok(())
}

/// Register a property pending verification
pub fn register(tx: &mut Transaction, new: NewProperty) -> Result<Property> {
    record::require_id("propertyId", &new.property_id)?;
    if new.property_id.starts_with(TRANSFER_PREFIX) {
        return Err(Error::Validation(format!(
            "propertyId must not start with {}",
            TRANSFER_PREFIX
        )));
    }
    record::require_id("owner", &new.owner)?;
    record::require_positive("area", new.area)?;
    record::require_positive("price", new.price)?;
    validate_coordinates(new.latitude, new.longitude)?;
    record::ensure_absent::<Property>(tx, &new.property_id)?;

    let now = timestamp::resolve(tx)?;
    let property = Property {
        property_id: new.property_id,
        owner: new.owner,
        owner_name: new.owner_name,
        location: new.location,
        area: new.area,
        price: new.price,
        status: PropertyStatus::PendingVerification,
        property_type: new.property_type,
        description: new.description,
        documents: Vec::new(),
        verified_by: String::new(),
        verified_at: None,
        registered_at: now,
        last_updated: now,
        views: 0,
        latitude: new.latitude,
        longitude: new.longitude,
    };
    record::store(tx, &property.property_id, &property)?;

    tracing::info!(
        property_id = %property.property_id,
        owner = %property.owner,
        "Property registered"
    );
    Ok(property)
}

/// Fetch a property
pub fn get(tx: &mut Transaction, property_id: &str) -> Result<Property> {
    record::load(tx, property_id)
}

/// Whether a property exists
pub fn exists(tx: &mut Transaction, property_id: &str) -> Result<bool> {
    record::exists::<Property>(tx, property_id)
}

/// Verifier approves a pending property
pub fn verify(tx: &mut Transaction, property_id: &str, verifier_id: &str) -> Result<Property> {
    record::require_id("verifierId", verifier_id)?;

    record::transition::<Property, _>(tx, property_id, PropertyOp::Verify, |p, now| {
        p.status = PropertyStatus::Verified;
        p.verified_by = verifier_id.to_string();
        p.verified_at = Some(now);
        p.last_updated = now;
        Ok(())
    })
}

/// Change the asking price of an unsold property
pub fn update_price(tx: &mut Transaction, property_id: &str, price: Decimal) -> Result<Property> {
    record::require_positive("price", price)?;

    record::transition::<Property, _>(tx, property_id, PropertyOp::UpdatePrice, |p, now| {
        p.price = price;
        p.last_updated = now;
        Ok(())
    })
}

/// Count one view. Allowed in every status.
pub fn increment_views(tx: &mut Transaction, property_id: &str) -> Result<Property> {
    let mut property = record::load::<Property>(tx, property_id)?;

    property.views = property
        .views
        .checked_add(1)
        .ok_or_else(|| Error::Validation(format!("view counter of {} overflowed", property_id)))?;
    property.last_updated = timestamp::resolve(tx)?;
    record::store(tx, property_id, &property)?;

    Ok(property)
}

/// Transfer ownership and record the sale.
///
/// The property becomes SOLD and a COMPLETED transfer record for its current
/// price is written under [`transfer_key`]. Both writes belong to `tx`, so
/// either both commit or neither does.
pub fn transfer(
    tx: &mut Transaction,
    property_id: &str,
    new_owner: &str,
    new_owner_name: &str,
    transaction_id: &str,
    escrow_id: Option<&str>,
) -> Result<(Property, TransferRecord)> {
    record::require_id("newOwner", new_owner)?;
    record::require_id("transactionId", transaction_id)?;

    let mut property = record::load::<Property>(tx, property_id)?;
    guard::check(property_id, property.status, PropertyOp::Transfer)?;
    if property.owner == new_owner {
        return Err(Error::Validation(format!(
            "{} already owns property {}",
            new_owner, property_id
        )));
    }

    let key = transfer_key(transaction_id);
    record::ensure_absent::<TransferRecord>(tx, &key)?;

    let now = timestamp::resolve(tx)?;
    let from_owner = std::mem::replace(&mut property.owner, new_owner.to_string());
    property.owner_name = new_owner_name.to_string();
    property.status = PropertyStatus::Sold;
    property.last_updated = now;

    let transfer = TransferRecord {
        transaction_id: transaction_id.to_string(),
        property_id: property_id.to_string(),
        from_owner,
        to_owner: new_owner.to_string(),
        amount: property.price,
        status: TransferStatus::Completed,
        escrow_id: escrow_id.map(str::to_string),
        timestamp: now,
    };

    record::store(tx, property_id, &property)?;
    record::store(tx, &key, &transfer)?;

    tracing::info!(
        property_id,
        transaction_id,
        from = %transfer.from_owner,
        to = %transfer.to_owner,
        "Property transferred"
    );
    Ok((property, transfer))
}

/// Move a property along the listing edges
pub fn update_status(
    tx: &mut Transaction,
    property_id: &str,
    target: PropertyStatus,
) -> Result<Property> {
    record::transition::<Property, _>(
        tx,
        property_id,
        PropertyOp::UpdateStatus(target),
        |p, now| {
            p.status = target;
            p.last_updated = now;
            Ok(())
        },
    )
}

/// Attach a document reference to an unsold property
pub fn add_document(tx: &mut Transaction, property_id: &str, document: &str) -> Result<Property> {
    record::require_id("document", document)?;

    record::transition::<Property, _>(tx, property_id, PropertyOp::AddDocument, |p, now| {
        if p.documents.iter().any(|d| d == document) {
            return Err(Error::AlreadyExists {
                entity: "property document",
                id: document.to_string(),
            });
        }
        p.documents.push(document.to_string());
        p.last_updated = now;
        Ok(())
    })
}

/// Properties in a given status
pub fn by_status(
    tx: &Transaction,
    status: PropertyStatus,
) -> Result<Records<QueryIter, Property>> {
    record::find_by(tx, "status", status.as_str())
}

/// Properties of a given type
pub fn by_type(tx: &Transaction, kind: PropertyType) -> Result<Records<QueryIter, Property>> {
    record::find_by(tx, "propertyType", kind.as_str())
}

/// Properties held by an owner
pub fn by_owner(tx: &Transaction, owner: &str) -> Result<Records<QueryIter, Property>> {
    record::find_by(tx, "owner", owner)
}

/// Every property, in id order. Transfer records are not included.
pub fn all(tx: &Transaction) -> Result<Records<RangeIter, Property>> {
    record::all(tx)
}

/// Version history of a property
pub fn history(tx: &Transaction, property_id: &str) -> Result<History<Property>> {
    record::history(tx, property_id)
}

/// Fetch a transfer record by transaction id
pub fn get_transaction(tx: &mut Transaction, transaction_id: &str) -> Result<TransferRecord> {
    record::load(tx, &transfer_key(transaction_id))
}

/// Transfer records of a property, in transaction id order.
///
/// Only keys under [`TRANSFER_PREFIX`] are scanned.
pub fn transactions_by_property<'a>(
    tx: &Transaction,
    property_id: &'a str,
) -> Result<impl Iterator<Item = Result<TransferRecord>> + 'a> {
    let transfers = record::with_prefix::<TransferRecord>(tx, TRANSFER_PREFIX)?;
    Ok(transfers.filter(move |t| !matches!(t, Ok(t) if t.property_id != property_id)))
}
