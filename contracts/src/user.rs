//! User contract
//!
//! Users are stored under their bare id in their own namespace, together with
//! their identity documents. Documents are verified individually by an admin.

use crate::guard::ClosedEnum;
use crate::record::{self, History, Record, Records};
use crate::{timestamp, Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{QueryIter, RangeIter, Transaction};
use serde::{Deserialize, Serialize};

/// Namespace of user records
pub const NAMESPACE: &str = "user";

closed_enum! {
    /// What a user may do on the registry
    Role {
        Buyer => "BUYER",
        Seller => "SELLER",
        Verifier => "VERIFIER",
        Admin => "ADMIN",
    }
}

/// Identity or ownership document attached to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub document_id: String,
    pub document_type: String,
    /// Content hash of the off-ledger file
    pub document_hash: String,
    pub uploaded_at: DateTime<Utc>,
    pub verified_by: String,
    pub is_verified: bool,
}

/// Registered user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub national_id: String,
    pub tax_id: String,
    pub address: String,
    pub role: Role,
    pub wallet_address: String,
    pub documents: Vec<Document>,
    pub password_hash: String,
    pub is_verified: bool,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl Record for User {
    const DOC_TYPE: &'static str = "user";
    const ENTITY: &'static str = "user";
}

/// Profile of a user being registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub national_id: String,
    pub tax_id: String,
    pub address: String,
    pub role: Role,
    pub wallet_address: String,
    pub password_hash: String,
}

/// Register an unverified user with no documents
pub fn register(tx: &mut Transaction, new: NewUser) -> Result<User> {
    record::require_id("userId", &new.user_id)?;
    record::require_id("name", &new.name)?;
    if !new.email.contains('@') {
        return Err(Error::Validation(format!(
            "email {:?} is not an address",
            new.email
        )));
    }
    record::ensure_absent::<User>(tx, &new.user_id)?;

    let now = timestamp::resolve(tx)?;
    let user = User {
        user_id: new.user_id,
        name: new.name,
        email: new.email,
        phone: new.phone,
        national_id: new.national_id,
        tax_id: new.tax_id,
        address: new.address,
        role: new.role,
        wallet_address: new.wallet_address,
        documents: Vec::new(),
        password_hash: new.password_hash,
        is_verified: false,
        registered_at: now,
        updated_at: now,
        last_login: None,
    };
    record::store(tx, &user.user_id, &user)?;

    tracing::info!(user_id = %user.user_id, role = %user.role, "User registered");
    Ok(user)
}

/// Fetch a user
pub fn get(tx: &mut Transaction, user_id: &str) -> Result<User> {
    record::load(tx, user_id)
}

/// Whether a user exists
pub fn exists(tx: &mut Transaction, user_id: &str) -> Result<bool> {
    record::exists::<User>(tx, user_id)
}

fn update<F>(tx: &mut Transaction, user_id: &str, mutate: F) -> Result<User>
where
    F: FnOnce(&mut User, DateTime<Utc>) -> Result<()>,
{
    let mut user = record::load::<User>(tx, user_id)?;
    let now = timestamp::resolve(tx)?;
    mutate(&mut user, now)?;
    user.updated_at = now;
    record::store(tx, user_id, &user)?;
    Ok(user)
}

/// Set the KYC flag of a user
pub fn update_verification(tx: &mut Transaction, user_id: &str, is_verified: bool) -> Result<User> {
    update(tx, user_id, |user, _| {
        user.is_verified = is_verified;
        Ok(())
    })
}

/// Attach an unverified document
pub fn add_document(
    tx: &mut Transaction,
    user_id: &str,
    document_id: &str,
    document_type: &str,
    document_hash: &str,
) -> Result<User> {
    record::require_id("documentId", document_id)?;
    record::require_id("documentHash", document_hash)?;

    update(tx, user_id, |user, now| {
        if user.documents.iter().any(|d| d.document_id == document_id) {
            return Err(Error::AlreadyExists {
                entity: "document",
                id: document_id.to_string(),
            });
        }

        user.documents.push(Document {
            document_id: document_id.to_string(),
            document_type: document_type.to_string(),
            document_hash: document_hash.to_string(),
            uploaded_at: now,
            verified_by: String::new(),
            is_verified: false,
        });
        Ok(())
    })
}

/// Admin marks one of the user's documents verified
pub fn verify_document(
    tx: &mut Transaction,
    user_id: &str,
    document_id: &str,
    admin_id: &str,
) -> Result<User> {
    record::require_id("adminId", admin_id)?;

    update(tx, user_id, |user, _| {
        let document = user
            .documents
            .iter_mut()
            .find(|d| d.document_id == document_id)
            .ok_or_else(|| Error::NotFound {
                entity: "document",
                id: document_id.to_string(),
            })?;

        if document.is_verified {
            return Err(Error::InvalidTransition {
                entity: "document",
                id: document_id.to_string(),
                operation: "verify".to_string(),
                status: "VERIFIED".to_string(),
            });
        }

        document.is_verified = true;
        document.verified_by = admin_id.to_string();
        Ok(())
    })
}

/// Record a login at the transaction's timestamp
pub fn update_last_login(tx: &mut Transaction, user_id: &str) -> Result<User> {
    update(tx, user_id, |user, now| {
        user.last_login = Some(now);
        Ok(())
    })
}

/// Users with a given role
pub fn by_role(tx: &Transaction, role: Role) -> Result<Records<QueryIter, User>> {
    record::find_by(tx, "role", role.as_str())
}

/// Every user, in id order
pub fn all(tx: &Transaction) -> Result<Records<RangeIter, User>> {
    record::all(tx)
}

/// Version history of a user
pub fn history(tx: &Transaction, user_id: &str) -> Result<History<User>> {
    record::history(tx, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Ledger, TxMetadata, TxTimestamp};

    fn alice() -> NewUser {
        NewUser {
            user_id: "U1".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            phone: "555-0100".to_string(),
            national_id: "1234-5678-9012".to_string(),
            tax_id: "ABCDE1234F".to_string(),
            address: "12 Hill Road".to_string(),
            role: Role::Buyer,
            wallet_address: "0xabc".to_string(),
            password_hash: "bcrypt$hash".to_string(),
        }
    }

    fn meta(tx_id: &str, seconds: i64) -> TxMetadata {
        TxMetadata::new(tx_id, TxTimestamp::new(seconds, 0))
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger
            .submit(NAMESPACE, meta("tx1", 1_700_000_000), |tx| register(tx, alice()))
            .await
            .unwrap();
        ledger
            .submit(NAMESPACE, meta("tx2", 1_700_000_010), |tx| {
                add_document(tx, "U1", "D1", "NATIONAL_ID", "sha256:aa")
            })
            .await
            .unwrap();

        let duplicate = ledger
            .submit(NAMESPACE, meta("tx3", 1_700_000_020), |tx| {
                add_document(tx, "U1", "D1", "NATIONAL_ID", "sha256:bb")
            })
            .await;
        assert!(matches!(duplicate, Err(Error::AlreadyExists { .. })));

        let unknown = ledger
            .submit(NAMESPACE, meta("tx4", 1_700_000_030), |tx| {
                verify_document(tx, "U1", "D9", "ADMIN1")
            })
            .await;
        assert!(matches!(unknown, Err(Error::NotFound { .. })));

        let (user, _) = ledger
            .submit(NAMESPACE, meta("tx5", 1_700_000_040), |tx| {
                verify_document(tx, "U1", "D1", "ADMIN1")
            })
            .await
            .unwrap();
        assert!(user.documents[0].is_verified);
        assert_eq!(user.documents[0].verified_by, "ADMIN1");
        assert_eq!(user.updated_at.timestamp(), 1_700_000_040);
        assert_eq!(user.documents[0].uploaded_at.timestamp(), 1_700_000_010);

        let again = ledger
            .submit(NAMESPACE, meta("tx6", 1_700_000_050), |tx| {
                verify_document(tx, "U1", "D1", "ADMIN1")
            })
            .await;
        assert!(matches!(again, Err(Error::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let ledger = Ledger::in_memory().await.unwrap();
        let mut bad = alice();
        bad.email = "not-an-address".to_string();

        let result = ledger
            .submit(NAMESPACE, meta("tx1", 1_700_000_000), |tx| register(tx, bad))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(ledger.latest_commit().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_login_and_roles() {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger
            .submit(NAMESPACE, meta("tx1", 1_700_000_000), |tx| register(tx, alice()))
            .await
            .unwrap();
        let (user, _) = ledger
            .submit(NAMESPACE, meta("tx2", 1_700_000_500), |tx| update_last_login(tx, "U1"))
            .await
            .unwrap();
        assert_eq!(user.last_login.map(|t| t.timestamp()), Some(1_700_000_500));

        let buyers = ledger
            .evaluate(NAMESPACE, |tx| by_role(tx, Role::Buyer)?.collect::<Result<Vec<_>>>())
            .unwrap();
        assert_eq!(buyers.len(), 1);

        let admins = ledger
            .evaluate(NAMESPACE, |tx| by_role(tx, Role::Admin)?.collect::<Result<Vec<_>>>())
            .unwrap();
        assert!(admins.is_empty());
    }
}
