//! Domain library for vendor offer storage.
//!
//! Holds the offer value types, the `OfferRepository` port, the per-call
//! context and the error taxonomy shared by every storage adapter. Keep
//! database drivers and other IO concerns out of this crate.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque identifier of the vendor behind an offer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VendorIdentity(String);

impl VendorIdentity {
    pub const MAX_LEN: usize = 128;

    pub fn new<S: Into<String>>(s: S) -> Result<Self, ValueError> {
        let val = s.into();
        if val.is_empty() {
            return Err(ValueError::InvalidVendorIdentity("empty"));
        }
        if val.len() > Self::MAX_LEN {
            return Err(ValueError::InvalidVendorIdentity("too long"));
        }
        if val.chars().any(char::is_control) {
            return Err(ValueError::InvalidVendorIdentity("control characters"));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VendorIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VendorIdentity {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VendorIdentity> for String {
    fn from(value: VendorIdentity) -> Self {
        value.0
    }
}

/// Name of a traded product.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductName(String);

impl ProductName {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, ValueError> {
        let val = s.into();
        if val.trim().is_empty() {
            return Err(ValueError::InvalidProductName("empty"));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProductName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProductName {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProductName> for String {
    fn from(value: ProductName) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Product {
    pub name: ProductName,
    pub price: Price,
}

impl Product {
    pub fn new(name: ProductName, price: Price) -> Self {
        Self { name, price }
    }
}

/// One offer line: a vendor selling (or buying) `count` units of a product
/// at a price.
///
/// The line is identified by vendor, product name and price together; `count`
/// is the only attribute that changes without changing identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VendorOffer {
    pub vendor: VendorIdentity,
    pub product: Product,
    pub count: i64,
}

impl VendorOffer {
    pub fn new(vendor: VendorIdentity, product: Product, count: i64) -> Self {
        Self {
            vendor,
            product,
            count,
        }
    }

    /// Same offer line with a different quantity.
    pub fn with_count(&self, count: i64) -> Self {
        Self {
            count,
            ..self.clone()
        }
    }

    /// Same vendor and product at a different price (a different offer line).
    pub fn with_price(&self, price: Price) -> Self {
        let mut next = self.clone();
        next.product.price = price;
        next
    }

    /// True when both offers name the same offer line.
    pub fn same_line(&self, other: &VendorOffer) -> bool {
        self.vendor == other.vendor
            && self.product.name == other.product.name
            && self.product.price == other.product.price
    }
}

/// Row shape of an offer table as adapters read it back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OfferRecord {
    pub id: i64,
    pub vendor_id: String,
    /// Hundredths, see [`Price`].
    pub price: i64,
    pub product_name: String,
    pub count: i64,
}

impl TryFrom<OfferRecord> for VendorOffer {
    type Error = ValueError;

    fn try_from(record: OfferRecord) -> Result<Self, Self::Error> {
        Ok(VendorOffer {
            vendor: VendorIdentity::new(record.vendor_id)?,
            product: Product {
                name: ProductName::new(record.product_name)?,
                price: Price::from_hundredths(record.price),
            },
            count: record.count,
        })
    }
}

/// Name of the table an operation targets.
///
/// Table names end up inside SQL text, so only plain identifiers are
/// accepted: ASCII letters, digits and `_`, not starting with a digit.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub const MAX_LEN: usize = 63;

    pub fn new<S: Into<String>>(s: S) -> Result<Self, ValueError> {
        let val = s.into();
        let invalid = |why: &str| ValueError::InvalidTableName(format!("{val:?}: {why}"));
        if val.is_empty() {
            return Err(invalid("empty"));
        }
        if val.len() > Self::MAX_LEN {
            return Err(invalid("too long"));
        }
        if val.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid("starts with a digit"));
        }
        if !val.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("invalid characters"));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TableName {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

/// The two sides of the market, each kept in its own table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ledger {
    Buy,
    Sell,
}

impl Ledger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ledger::Buy => "buy",
            Ledger::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(Ledger::Buy),
            "sell" => Some(Ledger::Sell),
            _ => None,
        }
    }

    pub fn table_name(&self) -> TableName {
        TableName(self.as_str().to_string())
    }
}

impl From<Ledger> for TableName {
    fn from(value: Ledger) -> Self {
        value.table_name()
    }
}

/// Pre-insert check on a whole offer. An `Err` vetoes the write.
pub type OnOfferAdd<'a> = dyn Fn(&VendorOffer) -> Result<(), ValidationError> + 'a;
/// Check on a new count before it is stored.
pub type OnCountUpdate<'a> = dyn Fn(i64, &VendorIdentity) -> Result<(), ValidationError> + 'a;
/// Check on a new price before it is stored.
pub type OnPriceUpdate<'a> = dyn Fn(Price, &VendorIdentity) -> Result<(), ValidationError> + 'a;

/// Repository port for offer lines kept in per-context tables.
///
/// Every call provisions its table first (idempotently), then runs the
/// caller's validation hook, then mutates. Hooks run without any store
/// resource held, so a hook may call back into the same store. Update and remove match on the
/// offer line (vendor, product name, price); no match is not an error.
pub trait OfferRepository: Send + Sync {
    /// Insert a new row. Does not merge with an existing matching line.
    fn add(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        on_add: &OnOfferAdd<'_>,
    ) -> Result<(), StorageError>;
    /// Delete every row of the offer's line.
    fn remove(&self, ctx: &CallContext, offer: &VendorOffer) -> Result<(), StorageError>;
    /// Move the offer's line to `new_price`.
    fn update_price(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        new_price: Price,
        on_update_price: &OnPriceUpdate<'_>,
    ) -> Result<(), StorageError>;
    /// Set the count of the offer's line to `offer.count`.
    fn update_count(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        on_update_count: &OnCountUpdate<'_>,
    ) -> Result<(), StorageError>;
    /// Offers for a product, cheapest first; equal prices in insertion order.
    fn list_offers_by_name(
        &self,
        ctx: &CallContext,
        product_name: &ProductName,
    ) -> Result<Vec<VendorOffer>, StorageError>;
    /// Offers of one vendor, cheapest first; equal prices in insertion order.
    fn list_offers_by_identity(
        &self,
        ctx: &CallContext,
        vendor: &VendorIdentity,
    ) -> Result<Vec<VendorOffer>, StorageError>;
}

impl<R: OfferRepository + ?Sized> OfferRepository for std::sync::Arc<R> {
    fn add(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        on_add: &OnOfferAdd<'_>,
    ) -> Result<(), StorageError> {
        (**self).add(ctx, offer, on_add)
    }

    fn remove(&self, ctx: &CallContext, offer: &VendorOffer) -> Result<(), StorageError> {
        (**self).remove(ctx, offer)
    }

    fn update_price(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        new_price: Price,
        on_update_price: &OnPriceUpdate<'_>,
    ) -> Result<(), StorageError> {
        (**self).update_price(ctx, offer, new_price, on_update_price)
    }

    fn update_count(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        on_update_count: &OnCountUpdate<'_>,
    ) -> Result<(), StorageError> {
        (**self).update_count(ctx, offer, on_update_count)
    }

    fn list_offers_by_name(
        &self,
        ctx: &CallContext,
        product_name: &ProductName,
    ) -> Result<Vec<VendorOffer>, StorageError> {
        (**self).list_offers_by_name(ctx, product_name)
    }

    fn list_offers_by_identity(
        &self,
        ctx: &CallContext,
        vendor: &VendorIdentity,
    ) -> Result<Vec<VendorOffer>, StorageError> {
        (**self).list_offers_by_identity(ctx, vendor)
    }
}

/// Malformed value passed to a domain constructor.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("invalid vendor identity: {0}")]
    InvalidVendorIdentity(&'static str),
    #[error("invalid product name: {0}")]
    InvalidProductName(&'static str),
    #[error("invalid price {0}")]
    InvalidPrice(String),
    #[error("invalid table name {0}")]
    InvalidTableName(String),
}

/// Veto returned by a validation callback.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Storage operation an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Add,
    Remove,
    UpdatePrice,
    UpdateCount,
    ListByName,
    ListByIdentity,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Remove => "remove",
            Operation::UpdatePrice => "update price",
            Operation::UpdateCount => "update count",
            Operation::ListByName => "list offers",
            Operation::ListByIdentity => "list vendor offers",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StorageErrorKind {
    #[error("creating table with name {table}: {message}")]
    TableProvision { table: String, message: String },
    #[error("validation: {0}")]
    Validation(ValidationError),
    #[error("query execution: {0}")]
    QueryExecution(String),
    #[error("row mapping: {0}")]
    RowMapping(String),
    #[error("cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("no database connection available within {0:?}")]
    PoolExhausted(Duration),
}

/// Error returned by every `OfferRepository` operation, prefixed with the
/// operation that failed (`storage offer add: validation: ...`).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("storage offer {op}: {kind}")]
pub struct StorageError {
    pub op: Operation,
    pub kind: StorageErrorKind,
}

impl StorageError {
    pub fn new(op: Operation, kind: StorageErrorKind) -> Self {
        Self { op, kind }
    }

    pub fn kind(&self) -> &StorageErrorKind {
        &self.kind
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind, StorageErrorKind::Validation(_))
    }

    /// Stopped by the caller's cancel token or deadline.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self.kind,
            StorageErrorKind::Cancelled | StorageErrorKind::DeadlineExceeded
        )
    }
}

pub mod adapters;
pub mod context;
pub mod price;
pub mod service;
pub mod validate;

pub use context::{CallContext, CancelToken, Interruption};
pub use price::Price;
