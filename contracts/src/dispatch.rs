//! Named invocations
//!
//! The ordering layer delivers every call as a contract name, a function name
//! and a list of string arguments. This module parses those into typed
//! commands, runs queries against a read-only transaction and submits
//! everything else through the commit path.

use crate::escrow;
use crate::guard::{self, ClosedEnum};
use crate::offer::{self, NewOffer, OfferStatus};
use crate::property::{self, NewProperty, PropertyStatus, PropertyType};
use crate::user::{self, NewUser, Role};
use crate::{Error, Result};
use ledger_core::crypto::to_hex;
use ledger_core::{CommitRecord, Ledger, Transaction, TxMetadata, TxTimestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

closed_enum! {
    /// Contract addressed by an invocation
    Contract {
        Escrow => "escrow",
        Offer => "offer",
        Property => "property",
        User => "user",
    }
}

impl Contract {
    /// Ledger namespace of the contract
    pub fn namespace(self) -> &'static str {
        match self {
            Contract::Escrow => escrow::NAMESPACE,
            Contract::Offer => offer::NAMESPACE,
            Contract::Property => property::NAMESPACE,
            Contract::User => user::NAMESPACE,
        }
    }
}

/// A call as delivered by the ordering layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub contract: Contract,
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Invocation {
    /// Build an invocation from string-like arguments
    pub fn new<I, S>(contract: Contract, function: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            contract,
            function: function.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Result of a successful invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// JSON payload returned to the caller
    pub result: Value,
    /// Commit receipt, `None` for queries
    pub commit: Option<CommitRecord>,
}

/// Positional argument reader
struct Args<'a> {
    function: &'a str,
    values: &'a [String],
    next: usize,
}

impl<'a> Args<'a> {
    fn new(function: &'a str, values: &'a [String], min: usize, max: usize) -> Result<Self> {
        if values.len() < min || values.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(Error::Validation(format!(
                "{} expects {} arguments, got {}",
                function,
                expected,
                values.len()
            )));
        }

        Ok(Self {
            function,
            values,
            next: 0,
        })
    }

    fn exact(function: &'a str, values: &'a [String], count: usize) -> Result<Self> {
        Self::new(function, values, count, count)
    }

    fn raw(&mut self) -> Result<&'a str> {
        let value = self.values.get(self.next).ok_or_else(|| {
            Error::Validation(format!("{}: missing argument {}", self.function, self.next))
        })?;
        self.next += 1;
        Ok(value)
    }

    fn text(&mut self) -> Result<String> {
        self.raw().map(str::to_string)
    }

    fn optional(&mut self) -> Option<String> {
        let value = self.values.get(self.next).cloned();
        self.next += 1;
        value.filter(|v| !v.is_empty())
    }

    fn decimal(&mut self, name: &str) -> Result<Decimal> {
        let raw = self.raw()?;
        Decimal::from_str(raw)
            .map_err(|e| Error::Validation(format!("{} {:?} is not a number: {}", name, raw, e)))
    }

    fn float(&mut self, name: &str) -> Result<f64> {
        let raw = self.raw()?;
        let value: f64 = raw
            .parse()
            .map_err(|_| Error::Validation(format!("{} {:?} is not a number", name, raw)))?;
        if !value.is_finite() {
            return Err(Error::Validation(format!("{} must be finite", name)));
        }
        Ok(value)
    }

    fn boolean(&mut self, name: &str) -> Result<bool> {
        match self.raw()? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(Error::Validation(format!(
                "{} {:?} is not a boolean",
                name, other
            ))),
        }
    }

    fn closed<E: ClosedEnum>(&mut self) -> Result<E> {
        guard::parse(self.raw()?)
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn unknown(contract: Contract, function: &str) -> Error {
    Error::Validation(format!("unknown function {} on {} contract", function, contract))
}

/// Escrow contract calls
#[derive(Debug, Clone, PartialEq)]
pub enum EscrowCommand {
    Create {
        escrow_id: String,
        property_id: String,
        buyer: String,
        seller: String,
        amount: Decimal,
    },
    Get(String),
    Exists(String),
    Fund { escrow_id: String, tx_hash: String },
    Release { escrow_id: String, tx_hash: String },
    Cancel { escrow_id: String, tx_hash: String },
    All,
    History(String),
}

impl EscrowCommand {
    fn parse(function: &str, args: &[String]) -> Result<Self> {
        let settle = |args: &[String]| -> Result<(String, String)> {
            let mut a = Args::exact(function, args, 2)?;
            Ok((a.text()?, a.text()?))
        };

        Ok(match function {
            "CreateEscrow" => {
                let mut a = Args::exact(function, args, 5)?;
                EscrowCommand::Create {
                    escrow_id: a.text()?,
                    property_id: a.text()?,
                    buyer: a.text()?,
                    seller: a.text()?,
                    amount: a.decimal("amount")?,
                }
            }
            "GetEscrow" => EscrowCommand::Get(Args::exact(function, args, 1)?.text()?),
            "EscrowExists" => EscrowCommand::Exists(Args::exact(function, args, 1)?.text()?),
            "FundEscrow" => {
                let (escrow_id, tx_hash) = settle(args)?;
                EscrowCommand::Fund { escrow_id, tx_hash }
            }
            "ReleaseEscrow" => {
                let (escrow_id, tx_hash) = settle(args)?;
                EscrowCommand::Release { escrow_id, tx_hash }
            }
            "CancelEscrow" => {
                let (escrow_id, tx_hash) = settle(args)?;
                EscrowCommand::Cancel { escrow_id, tx_hash }
            }
            "GetAllEscrows" => {
                Args::exact(function, args, 0)?;
                EscrowCommand::All
            }
            "GetEscrowHistory" => EscrowCommand::History(Args::exact(function, args, 1)?.text()?),
            _ => return Err(unknown(Contract::Escrow, function)),
        })
    }

    fn is_query(&self) -> bool {
        matches!(
            self,
            EscrowCommand::Get(_)
                | EscrowCommand::Exists(_)
                | EscrowCommand::All
                | EscrowCommand::History(_)
        )
    }

    fn run(&self, tx: &mut Transaction) -> Result<Value> {
        match self {
            EscrowCommand::Create {
                escrow_id,
                property_id,
                buyer,
                seller,
                amount,
            } => to_json(escrow::create(tx, escrow_id, property_id, buyer, seller, *amount)?),
            EscrowCommand::Get(id) => to_json(escrow::get(tx, id)?),
            EscrowCommand::Exists(id) => to_json(escrow::exists(tx, id)?),
            EscrowCommand::Fund { escrow_id, tx_hash } => {
                to_json(escrow::fund(tx, escrow_id, tx_hash)?)
            }
            EscrowCommand::Release { escrow_id, tx_hash } => {
                to_json(escrow::release(tx, escrow_id, tx_hash)?)
            }
            EscrowCommand::Cancel { escrow_id, tx_hash } => {
                to_json(escrow::cancel(tx, escrow_id, tx_hash)?)
            }
            EscrowCommand::All => to_json(escrow::all(tx)?.collect::<Result<Vec<_>>>()?),
            EscrowCommand::History(id) => {
                to_json(escrow::history(tx, id)?.collect::<Result<Vec<_>>>()?)
            }
        }
    }
}

/// Offer contract calls
#[derive(Debug, Clone, PartialEq)]
pub enum OfferCommand {
    Create(NewOffer),
    Get(String),
    Exists(String),
    Accept(String),
    Reject(String),
    AdminVerify {
        offer_id: String,
        admin_id: String,
        external_tx_hash: String,
    },
    Complete(String),
    Cancel(String),
    ByProperty(String),
    ByBuyer(String),
    BySeller(String),
    ByStatus(OfferStatus),
    PendingAdminVerifications,
    All,
    History(String),
}

impl OfferCommand {
    fn parse(function: &str, args: &[String]) -> Result<Self> {
        let single = |args: &[String]| Args::exact(function, args, 1)?.text();

        Ok(match function {
            "CreateOffer" => {
                let mut a = Args::exact(function, args, 8)?;
                OfferCommand::Create(NewOffer {
                    offer_id: a.text()?,
                    property_id: a.text()?,
                    buyer_id: a.text()?,
                    buyer_name: a.text()?,
                    seller_id: a.text()?,
                    seller_name: a.text()?,
                    offer_amount: a.decimal("offerAmount")?,
                    message: a.text()?,
                })
            }
            "GetOffer" => OfferCommand::Get(single(args)?),
            "OfferExists" => OfferCommand::Exists(single(args)?),
            "AcceptOffer" => OfferCommand::Accept(single(args)?),
            "RejectOffer" => OfferCommand::Reject(single(args)?),
            "AdminVerifyOffer" => {
                let mut a = Args::exact(function, args, 3)?;
                OfferCommand::AdminVerify {
                    offer_id: a.text()?,
                    admin_id: a.text()?,
                    external_tx_hash: a.text()?,
                }
            }
            "CompleteOffer" => OfferCommand::Complete(single(args)?),
            "CancelOffer" => OfferCommand::Cancel(single(args)?),
            "GetOffersByProperty" => OfferCommand::ByProperty(single(args)?),
            "GetOffersByBuyer" => OfferCommand::ByBuyer(single(args)?),
            "GetOffersBySeller" => OfferCommand::BySeller(single(args)?),
            "GetOffersByStatus" => {
                OfferCommand::ByStatus(Args::exact(function, args, 1)?.closed()?)
            }
            "GetPendingAdminVerifications" => {
                Args::exact(function, args, 0)?;
                OfferCommand::PendingAdminVerifications
            }
            "GetAllOffers" => {
                Args::exact(function, args, 0)?;
                OfferCommand::All
            }
            "GetOfferHistory" => OfferCommand::History(single(args)?),
            _ => return Err(unknown(Contract::Offer, function)),
        })
    }

    fn is_query(&self) -> bool {
        !matches!(
            self,
            OfferCommand::Create(_)
                | OfferCommand::Accept(_)
                | OfferCommand::Reject(_)
                | OfferCommand::AdminVerify { .. }
                | OfferCommand::Complete(_)
                | OfferCommand::Cancel(_)
        )
    }

    fn run(&self, tx: &mut Transaction) -> Result<Value> {
        match self {
            OfferCommand::Create(new) => to_json(offer::create(tx, new.clone())?),
            OfferCommand::Get(id) => to_json(offer::get(tx, id)?),
            OfferCommand::Exists(id) => to_json(offer::exists(tx, id)?),
            OfferCommand::Accept(id) => to_json(offer::accept(tx, id)?),
            OfferCommand::Reject(id) => to_json(offer::reject(tx, id)?),
            OfferCommand::AdminVerify {
                offer_id,
                admin_id,
                external_tx_hash,
            } => to_json(offer::admin_verify(tx, offer_id, admin_id, external_tx_hash)?),
            OfferCommand::Complete(id) => to_json(offer::complete(tx, id)?),
            OfferCommand::Cancel(id) => to_json(offer::cancel(tx, id)?),
            OfferCommand::ByProperty(id) => {
                to_json(offer::by_property(tx, id)?.collect::<Result<Vec<_>>>()?)
            }
            OfferCommand::ByBuyer(id) => {
                to_json(offer::by_buyer(tx, id)?.collect::<Result<Vec<_>>>()?)
            }
            OfferCommand::BySeller(id) => {
                to_json(offer::by_seller(tx, id)?.collect::<Result<Vec<_>>>()?)
            }
            OfferCommand::ByStatus(status) => {
                to_json(offer::by_status(tx, *status)?.collect::<Result<Vec<_>>>()?)
            }
            OfferCommand::PendingAdminVerifications => {
                to_json(offer::pending_admin_verifications(tx)?.collect::<Result<Vec<_>>>()?)
            }
            OfferCommand::All => to_json(offer::all(tx)?.collect::<Result<Vec<_>>>()?),
            OfferCommand::History(id) => {
                to_json(offer::history(tx, id)?.collect::<Result<Vec<_>>>()?)
            }
        }
    }
}

/// Property contract calls
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyCommand {
    Register(NewProperty),
    Get(String),
    Exists(String),
    Verify {
        property_id: String,
        verifier_id: String,
    },
    UpdatePrice {
        property_id: String,
        price: Decimal,
    },
    IncrementViews(String),
    Transfer {
        property_id: String,
        new_owner: String,
        new_owner_name: String,
        transaction_id: String,
        escrow_id: Option<String>,
    },
    UpdateStatus {
        property_id: String,
        status: PropertyStatus,
    },
    AddDocument {
        property_id: String,
        document: String,
    },
    ByStatus(PropertyStatus),
    ByType(PropertyType),
    ByOwner(String),
    All,
    History(String),
    GetTransaction(String),
    TransactionsByProperty(String),
}

impl PropertyCommand {
    fn parse(function: &str, args: &[String]) -> Result<Self> {
        let single = |args: &[String]| Args::exact(function, args, 1)?.text();

        Ok(match function {
            "RegisterProperty" => {
                let mut a = Args::exact(function, args, 10)?;
                PropertyCommand::Register(NewProperty {
                    property_id: a.text()?,
                    owner: a.text()?,
                    owner_name: a.text()?,
                    location: a.text()?,
                    area: a.decimal("area")?,
                    price: a.decimal("price")?,
                    property_type: a.closed()?,
                    description: a.text()?,
                    latitude: a.float("latitude")?,
                    longitude: a.float("longitude")?,
                })
            }
            "GetProperty" => PropertyCommand::Get(single(args)?),
            "PropertyExists" => PropertyCommand::Exists(single(args)?),
            "VerifyProperty" => {
                let mut a = Args::exact(function, args, 2)?;
                PropertyCommand::Verify {
                    property_id: a.text()?,
                    verifier_id: a.text()?,
                }
            }
            "UpdatePropertyPrice" => {
                let mut a = Args::exact(function, args, 2)?;
                PropertyCommand::UpdatePrice {
                    property_id: a.text()?,
                    price: a.decimal("price")?,
                }
            }
            "IncrementPropertyViews" => PropertyCommand::IncrementViews(single(args)?),
            "TransferProperty" => {
                let mut a = Args::new(function, args, 4, 5)?;
                PropertyCommand::Transfer {
                    property_id: a.text()?,
                    new_owner: a.text()?,
                    new_owner_name: a.text()?,
                    transaction_id: a.text()?,
                    escrow_id: a.optional(),
                }
            }
            "UpdatePropertyStatus" => {
                let mut a = Args::exact(function, args, 2)?;
                PropertyCommand::UpdateStatus {
                    property_id: a.text()?,
                    status: a.closed()?,
                }
            }
            "AddPropertyDocument" => {
                let mut a = Args::exact(function, args, 2)?;
                PropertyCommand::AddDocument {
                    property_id: a.text()?,
                    document: a.text()?,
                }
            }
            "GetPropertiesByStatus" => {
                PropertyCommand::ByStatus(Args::exact(function, args, 1)?.closed()?)
            }
            "GetPropertiesByType" => {
                PropertyCommand::ByType(Args::exact(function, args, 1)?.closed()?)
            }
            "GetPropertiesByOwner" => PropertyCommand::ByOwner(single(args)?),
            "GetAllProperties" => {
                Args::exact(function, args, 0)?;
                PropertyCommand::All
            }
            "GetPropertyHistory" => PropertyCommand::History(single(args)?),
            "GetTransaction" => PropertyCommand::GetTransaction(single(args)?),
            "GetTransactionsByProperty" => {
                PropertyCommand::TransactionsByProperty(single(args)?)
            }
            _ => return Err(unknown(Contract::Property, function)),
        })
    }

    fn is_query(&self) -> bool {
        !matches!(
            self,
            PropertyCommand::Register(_)
                | PropertyCommand::Verify { .. }
                | PropertyCommand::UpdatePrice { .. }
                | PropertyCommand::IncrementViews(_)
                | PropertyCommand::Transfer { .. }
                | PropertyCommand::UpdateStatus { .. }
                | PropertyCommand::AddDocument { .. }
        )
    }

    fn run(&self, tx: &mut Transaction) -> Result<Value> {
        match self {
            PropertyCommand::Register(new) => to_json(property::register(tx, new.clone())?),
            PropertyCommand::Get(id) => to_json(property::get(tx, id)?),
            PropertyCommand::Exists(id) => to_json(property::exists(tx, id)?),
            PropertyCommand::Verify {
                property_id,
                verifier_id,
            } => to_json(property::verify(tx, property_id, verifier_id)?),
            PropertyCommand::UpdatePrice { property_id, price } => {
                to_json(property::update_price(tx, property_id, *price)?)
            }
            PropertyCommand::IncrementViews(id) => to_json(property::increment_views(tx, id)?),
            PropertyCommand::Transfer {
                property_id,
                new_owner,
                new_owner_name,
                transaction_id,
                escrow_id,
            } => {
                let (property, transaction) = property::transfer(
                    tx,
                    property_id,
                    new_owner,
                    new_owner_name,
                    transaction_id,
                    escrow_id.as_deref(),
                )?;
                let mut result = Map::new();
                result.insert("property".to_string(), serde_json::to_value(property)?);
                result.insert("transaction".to_string(), serde_json::to_value(transaction)?);
                Ok(Value::Object(result))
            }
            PropertyCommand::UpdateStatus {
                property_id,
                status,
            } => to_json(property::update_status(tx, property_id, *status)?),
            PropertyCommand::AddDocument {
                property_id,
                document,
            } => to_json(property::add_document(tx, property_id, document)?),
            PropertyCommand::ByStatus(status) => {
                to_json(property::by_status(tx, *status)?.collect::<Result<Vec<_>>>()?)
            }
            PropertyCommand::ByType(kind) => {
                to_json(property::by_type(tx, *kind)?.collect::<Result<Vec<_>>>()?)
            }
            PropertyCommand::ByOwner(owner) => {
                to_json(property::by_owner(tx, owner)?.collect::<Result<Vec<_>>>()?)
            }
            PropertyCommand::All => to_json(property::all(tx)?.collect::<Result<Vec<_>>>()?),
            PropertyCommand::History(id) => {
                to_json(property::history(tx, id)?.collect::<Result<Vec<_>>>()?)
            }
            PropertyCommand::GetTransaction(id) => to_json(property::get_transaction(tx, id)?),
            PropertyCommand::TransactionsByProperty(id) => to_json(
                property::transactions_by_property(tx, id)?.collect::<Result<Vec<_>>>()?
            ),
        }
    }
}

/// User contract calls
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Register(NewUser),
    Get(String),
    Exists(String),
    UpdateVerification {
        user_id: String,
        is_verified: bool,
    },
    AddDocument {
        user_id: String,
        document_id: String,
        document_type: String,
        document_hash: String,
    },
    VerifyDocument {
        user_id: String,
        document_id: String,
        admin_id: String,
    },
    UpdateLastLogin(String),
    ByRole(Role),
    All,
    History(String),
}

impl UserCommand {
    fn parse(function: &str, args: &[String]) -> Result<Self> {
        let single = |args: &[String]| Args::exact(function, args, 1)?.text();

        Ok(match function {
            "RegisterUser" => {
                let mut a = Args::exact(function, args, 10)?;
                UserCommand::Register(NewUser {
                    user_id: a.text()?,
                    name: a.text()?,
                    email: a.text()?,
                    phone: a.text()?,
                    national_id: a.text()?,
                    tax_id: a.text()?,
                    address: a.text()?,
                    role: a.closed()?,
                    wallet_address: a.text()?,
                    password_hash: a.text()?,
                })
            }
            "GetUser" => UserCommand::Get(single(args)?),
            "UserExists" => UserCommand::Exists(single(args)?),
            "UpdateUserVerification" => {
                let mut a = Args::exact(function, args, 2)?;
                UserCommand::UpdateVerification {
                    user_id: a.text()?,
                    is_verified: a.boolean("isVerified")?,
                }
            }
            "AddDocument" => {
                let mut a = Args::exact(function, args, 4)?;
                UserCommand::AddDocument {
                    user_id: a.text()?,
                    document_id: a.text()?,
                    document_type: a.text()?,
                    document_hash: a.text()?,
                }
            }
            "VerifyDocument" => {
                let mut a = Args::exact(function, args, 3)?;
                UserCommand::VerifyDocument {
                    user_id: a.text()?,
                    document_id: a.text()?,
                    admin_id: a.text()?,
                }
            }
            "UpdateLastLogin" => UserCommand::UpdateLastLogin(single(args)?),
            "GetUsersByRole" => UserCommand::ByRole(Args::exact(function, args, 1)?.closed()?),
            "GetAllUsers" => {
                Args::exact(function, args, 0)?;
                UserCommand::All
            }
            "GetUserHistory" => UserCommand::History(single(args)?),
            _ => return Err(unknown(Contract::User, function)),
        })
    }

    fn is_query(&self) -> bool {
        matches!(
            self,
            UserCommand::Get(_)
                | UserCommand::Exists(_)
                | UserCommand::ByRole(_)
                | UserCommand::All
                | UserCommand::History(_)
        )
    }

    fn run(&self, tx: &mut Transaction) -> Result<Value> {
        match self {
            UserCommand::Register(new) => to_json(user::register(tx, new.clone())?),
            UserCommand::Get(id) => to_json(user::get(tx, id)?),
            UserCommand::Exists(id) => to_json(user::exists(tx, id)?),
            UserCommand::UpdateVerification {
                user_id,
                is_verified,
            } => to_json(user::update_verification(tx, user_id, *is_verified)?),
            UserCommand::AddDocument {
                user_id,
                document_id,
                document_type,
                document_hash,
            } => to_json(user::add_document(
                tx,
                user_id,
                document_id,
                document_type,
                document_hash,
            )?),
            UserCommand::VerifyDocument {
                user_id,
                document_id,
                admin_id,
            } => to_json(user::verify_document(tx, user_id, document_id, admin_id)?),
            UserCommand::UpdateLastLogin(id) => to_json(user::update_last_login(tx, id)?),
            UserCommand::ByRole(role) => {
                to_json(user::by_role(tx, *role)?.collect::<Result<Vec<_>>>()?)
            }
            UserCommand::All => to_json(user::all(tx)?.collect::<Result<Vec<_>>>()?),
            UserCommand::History(id) => {
                to_json(user::history(tx, id)?.collect::<Result<Vec<_>>>()?)
            }
        }
    }
}

/// A parsed invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Escrow(EscrowCommand),
    Offer(OfferCommand),
    Property(PropertyCommand),
    User(UserCommand),
}

impl Command {
    /// Parse an invocation; bad names, arity or argument values are validation errors
    pub fn parse(invocation: &Invocation) -> Result<Self> {
        let function = invocation.function.as_str();
        let args = invocation.args.as_slice();

        Ok(match invocation.contract {
            Contract::Escrow => Command::Escrow(EscrowCommand::parse(function, args)?),
            Contract::Offer => Command::Offer(OfferCommand::parse(function, args)?),
            Contract::Property => Command::Property(PropertyCommand::parse(function, args)?),
            Contract::User => Command::User(UserCommand::parse(function, args)?),
        })
    }

    /// Contract the command belongs to
    pub fn contract(&self) -> Contract {
        match self {
            Command::Escrow(_) => Contract::Escrow,
            Command::Offer(_) => Contract::Offer,
            Command::Property(_) => Contract::Property,
            Command::User(_) => Contract::User,
        }
    }

    /// Whether the command only reads
    pub fn is_query(&self) -> bool {
        match self {
            Command::Escrow(c) => c.is_query(),
            Command::Offer(c) => c.is_query(),
            Command::Property(c) => c.is_query(),
            Command::User(c) => c.is_query(),
        }
    }

    /// Execute against `tx`, which must be bound to the command's namespace
    pub fn run(&self, tx: &mut Transaction) -> Result<Value> {
        match self {
            Command::Escrow(c) => c.run(tx),
            Command::Offer(c) => c.run(tx),
            Command::Property(c) => c.run(tx),
            Command::User(c) => c.run(tx),
        }
    }
}

/// Routes invocations to a ledger
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ledger: Ledger,
}

impl Dispatcher {
    /// Create dispatcher over `ledger`
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run one invocation.
    ///
    /// Queries are evaluated read-only and need no metadata. Every other
    /// command is committed under `metadata`, which must be present.
    pub async fn invoke(
        &self,
        invocation: &Invocation,
        metadata: Option<TxMetadata>,
    ) -> Result<Outcome> {
        let command = Command::parse(invocation)?;
        let namespace = command.contract().namespace();

        if command.is_query() {
            let result = self.ledger.evaluate(namespace, |tx| command.run(tx))?;
            return Ok(Outcome {
                result,
                commit: None,
            });
        }

        let metadata = metadata.ok_or_else(|| {
            Error::Validation(format!(
                "{} changes state and needs a transaction envelope",
                invocation.function
            ))
        })?;

        let (result, commit) = self
            .ledger
            .submit(namespace, metadata, |tx| command.run(tx))
            .await?;

        tracing::info!(
            contract = %invocation.contract,
            function = %invocation.function,
            height = commit.height,
            tx_id = %commit.tx_id,
            "Invocation committed"
        );

        Ok(Outcome {
            result,
            commit: Some(commit),
        })
    }
}

/// Invocation together with the envelope fields assigned by the ordering layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub tx_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<TxTimestamp>,
    #[serde(flatten)]
    pub invocation: Invocation,
}

impl Envelope {
    /// Transaction metadata, present only when both id and timestamp are set
    pub fn metadata(&self) -> Option<TxMetadata> {
        match (&self.tx_id, self.timestamp) {
            (Some(tx_id), Some(timestamp)) => Some(TxMetadata::new(tx_id.clone(), timestamp)),
            _ => None,
        }
    }
}

/// Error reported to a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind, see [`Error::kind`]
    pub kind: String,
    pub message: String,
}

/// Reply to one envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub tx_id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Response {
    /// Failed reply
    pub fn failure(tx_id: Option<String>, err: &Error) -> Self {
        Self {
            tx_id,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
            height: None,
            hash: None,
        }
    }
}

impl Dispatcher {
    /// Run an envelope and build the reply; never fails
    pub async fn handle(&self, envelope: Envelope) -> Response {
        let tx_id = envelope.tx_id.clone();

        match self.invoke(&envelope.invocation, envelope.metadata()).await {
            Ok(outcome) => Response {
                tx_id,
                ok: true,
                result: Some(outcome.result),
                error: None,
                height: outcome.commit.as_ref().map(|c| c.height),
                hash: outcome.commit.as_ref().map(|c| to_hex(&c.hash)),
            },
            Err(e) => {
                tracing::warn!(
                    contract = %envelope.invocation.contract,
                    function = %envelope.invocation.function,
                    kind = e.kind(),
                    error = %e,
                    "Invocation failed"
                );
                Response::failure(tx_id, &e)
            }
        }
    }
}
