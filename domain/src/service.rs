use std::time::Duration;

use crate::validate::{validate_count_update, validate_new_offer, validate_price_update};
use crate::{
    CallContext, CancelToken, Ledger, OfferRepository, Price, ProductName, StorageError,
    TableName, VendorIdentity, VendorOffer,
};

/// Offer operations pre-bound to one table.
///
/// Wraps any `OfferRepository`, applies the stock validators from
/// [`crate::validate`], and builds the `CallContext` for every call so the
/// caller only deals with offers. An optional per-call timeout and a shared
/// cancel token are attached to each context.
pub struct OfferBook<R: OfferRepository> {
    repo: R,
    table: TableName,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl<R: OfferRepository> OfferBook<R> {
    pub fn new(repo: R, table: TableName) -> Self {
        Self {
            repo,
            table,
            timeout: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn for_ledger(repo: R, ledger: Ledger) -> Self {
        Self::new(repo, ledger.table_name())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Token that aborts every call made through this book once cancelled.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn context(&self) -> CallContext {
        let ctx = CallContext::new(self.table.clone()).with_cancel(self.cancel.clone());
        match self.timeout {
            Some(t) => ctx.with_timeout(t),
            None => ctx,
        }
    }

    /// Store a new offer line after checking price and count.
    pub fn add(&self, offer: &VendorOffer) -> Result<(), StorageError> {
        self.repo.add(&self.context(), offer, &validate_new_offer)
    }

    pub fn remove(&self, offer: &VendorOffer) -> Result<(), StorageError> {
        self.repo.remove(&self.context(), offer)
    }

    /// Reprice the line `offer` currently sits at.
    pub fn update_price(&self, offer: &VendorOffer, new_price: Price) -> Result<(), StorageError> {
        self.repo
            .update_price(&self.context(), offer, new_price, &validate_price_update)
    }

    /// Set the count of the line `offer` names; `offer.count` is ignored.
    pub fn update_count(&self, offer: &VendorOffer, new_count: i64) -> Result<(), StorageError> {
        self.repo.update_count(
            &self.context(),
            &offer.with_count(new_count),
            &validate_count_update,
        )
    }

    pub fn by_product(&self, name: &ProductName) -> Result<Vec<VendorOffer>, StorageError> {
        self.repo.list_offers_by_name(&self.context(), name)
    }

    pub fn by_vendor(&self, vendor: &VendorIdentity) -> Result<Vec<VendorOffer>, StorageError> {
        self.repo.list_offers_by_identity(&self.context(), vendor)
    }
}
