use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::{
    CallContext, OfferRecord, OfferRepository, OnCountUpdate, OnOfferAdd, OnPriceUpdate,
    Operation, Price, ProductName, StorageError, StorageErrorKind, TableName, ValidationError,
    VendorIdentity, VendorOffer,
};

#[derive(Default)]
struct Tables {
    rows: BTreeMap<TableName, Vec<OfferRecord>>,
    next_id: i64,
}

/// Simple in-memory offer store for tests. Mirrors the relational adapter:
/// tables appear on first use, rows carry an insertion id, and updates match
/// on the offer line.
pub struct InMemoryOfferStore {
    inner: Mutex<Tables>,
}

impl InMemoryOfferStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Tables::default()),
        }
    }

    /// Names of the tables provisioned so far.
    pub fn tables(&self) -> Vec<TableName> {
        self.inner
            .lock()
            .map(|t| t.rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Run `f` against the context's table, creating it when missing.
    fn with_table<T>(
        &self,
        op: Operation,
        ctx: &CallContext,
        f: impl FnOnce(&mut Vec<OfferRecord>, &mut i64) -> Result<T, StorageErrorKind>,
    ) -> Result<T, StorageError> {
        let fail = |kind: StorageErrorKind| StorageError::new(op, kind);
        ctx.check().map_err(|i| fail(i.into()))?;
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| fail(StorageErrorKind::QueryExecution("mutex poisoned".into())))?;
        let tables = &mut *guard;
        let rows = tables.rows.entry(ctx.table().clone()).or_default();
        f(rows, &mut tables.next_id).map_err(fail)
    }

    /// Provision the table, run `validate` with the lock released, then
    /// apply `f`. Validators may read from this store.
    fn with_validated_table<T>(
        &self,
        op: Operation,
        ctx: &CallContext,
        validate: impl FnOnce() -> Result<(), ValidationError>,
        f: impl FnOnce(&mut Vec<OfferRecord>, &mut i64) -> Result<T, StorageErrorKind>,
    ) -> Result<T, StorageError> {
        self.with_table(op, ctx, |_, _| Ok(()))?;
        validate().map_err(|e| StorageError::new(op, StorageErrorKind::Validation(e)))?;
        self.with_table(op, ctx, f)
    }
}

impl Default for InMemoryOfferStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_line(record: &OfferRecord, offer: &VendorOffer) -> bool {
    record.vendor_id == offer.vendor.as_str()
        && record.product_name == offer.product.name.as_str()
        && record.price == offer.product.price.hundredths()
}

fn sorted_offers<'a>(
    rows: impl Iterator<Item = &'a OfferRecord>,
) -> Result<Vec<VendorOffer>, StorageErrorKind> {
    let mut picked: Vec<&OfferRecord> = rows.collect();
    picked.sort_by_key(|r| (r.price, r.id));
    picked
        .into_iter()
        .map(|r| {
            VendorOffer::try_from(r.clone())
                .map_err(|e| StorageErrorKind::RowMapping(e.to_string()))
        })
        .collect()
}

impl OfferRepository for InMemoryOfferStore {
    fn add(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        on_add: &OnOfferAdd<'_>,
    ) -> Result<(), StorageError> {
        self.with_validated_table(Operation::Add, ctx, || on_add(offer), |rows, next_id| {
            *next_id += 1;
            rows.push(OfferRecord {
                id: *next_id,
                vendor_id: offer.vendor.as_str().to_string(),
                price: offer.product.price.hundredths(),
                product_name: offer.product.name.as_str().to_string(),
                count: offer.count,
            });
            Ok(())
        })
    }

    fn remove(&self, ctx: &CallContext, offer: &VendorOffer) -> Result<(), StorageError> {
        self.with_table(Operation::Remove, ctx, |rows, _| {
            rows.retain(|r| !matches_line(r, offer));
            Ok(())
        })
    }

    fn update_price(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        new_price: Price,
        on_update_price: &OnPriceUpdate<'_>,
    ) -> Result<(), StorageError> {
        let validate = || on_update_price(new_price, &offer.vendor);
        self.with_validated_table(Operation::UpdatePrice, ctx, validate, |rows, _| {
            rows.iter_mut()
                .filter(|r| matches_line(r, offer))
                .for_each(|r| r.price = new_price.hundredths());
            Ok(())
        })
    }

    fn update_count(
        &self,
        ctx: &CallContext,
        offer: &VendorOffer,
        on_update_count: &OnCountUpdate<'_>,
    ) -> Result<(), StorageError> {
        let validate = || on_update_count(offer.count, &offer.vendor);
        self.with_validated_table(Operation::UpdateCount, ctx, validate, |rows, _| {
            rows.iter_mut()
                .filter(|r| matches_line(r, offer))
                .for_each(|r| r.count = offer.count);
            Ok(())
        })
    }

    fn list_offers_by_name(
        &self,
        ctx: &CallContext,
        product_name: &ProductName,
    ) -> Result<Vec<VendorOffer>, StorageError> {
        self.with_table(Operation::ListByName, ctx, |rows, _| {
            sorted_offers(rows.iter().filter(|r| r.product_name == product_name.as_str()))
        })
    }

    fn list_offers_by_identity(
        &self,
        ctx: &CallContext,
        vendor: &VendorIdentity,
    ) -> Result<Vec<VendorOffer>, StorageError> {
        self.with_table(Operation::ListByIdentity, ctx, |rows, _| {
            sorted_offers(rows.iter().filter(|r| r.vendor_id == vendor.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{accept_count, accept_offer, accept_price, validate_new_offer};
    use crate::{CancelToken, Ledger, Product};

    fn ctx() -> CallContext {
        CallContext::new(Ledger::Sell.table_name())
    }

    fn mk_offer(vendor: &str, name: &str, price: &str, count: i64) -> VendorOffer {
        VendorOffer::new(
            VendorIdentity::new(vendor).unwrap(),
            Product::new(product_name(name), price.parse().unwrap()),
            count,
        )
    }

    fn product_name(name: &str) -> ProductName {
        ProductName::new(name).unwrap()
    }

    fn apple() -> ProductName {
        product_name("apple")
    }

    #[test]
    fn add_then_list_by_identity() {
        let store = InMemoryOfferStore::new();
        let offer = mk_offer("V1", "apple", "1.50", 5);
        store.add(&ctx(), &offer, &accept_offer).unwrap();
        let got = store
            .list_offers_by_identity(&ctx(), &offer.vendor)
            .unwrap();
        assert_eq!(got, vec![offer]);
    }

    #[test]
    fn lists_cheapest_first() {
        let store = InMemoryOfferStore::new();
        for (vendor, price) in [("V1", "30.00"), ("V2", "10.00"), ("V3", "20.00")] {
            store
                .add(&ctx(), &mk_offer(vendor, "apple", price, 1), &accept_offer)
                .unwrap();
        }
        let prices: Vec<String> = store
            .list_offers_by_name(&ctx(), &apple())
            .unwrap()
            .iter()
            .map(|o| o.product.price.to_string())
            .collect();
        assert_eq!(prices, vec!["10.00", "20.00", "30.00"]);
    }

    #[test]
    fn validation_veto_writes_nothing() {
        let store = InMemoryOfferStore::new();
        let err = store
            .add(&ctx(), &mk_offer("V1", "apple", "-1", 5), &validate_new_offer)
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.op, Operation::Add);
        assert!(store.list_offers_by_name(&ctx(), &apple()).unwrap().is_empty());
    }

    #[test]
    fn update_count_and_price_match_the_line() {
        let store = InMemoryOfferStore::new();
        let offer = mk_offer("V1", "apple", "1.50", 5);
        store.add(&ctx(), &offer, &accept_offer).unwrap();

        store
            .update_count(&ctx(), &offer.with_count(3), &accept_count)
            .unwrap();
        let new_price = Price::from_hundredths(175);
        store
            .update_price(&ctx(), &offer, new_price, &accept_price)
            .unwrap();
        // stale price no longer matches
        store
            .update_price(&ctx(), &offer, Price::from_hundredths(999), &accept_price)
            .unwrap();

        let got = store.list_offers_by_name(&ctx(), &apple()).unwrap();
        assert_eq!(got, vec![offer.with_price(new_price).with_count(3)]);
    }

    #[test]
    fn update_veto_keeps_row() {
        let store = InMemoryOfferStore::new();
        let offer = mk_offer("V1", "apple", "1.50", 5);
        store.add(&ctx(), &offer, &accept_offer).unwrap();
        let veto = |_: i64, _: &VendorIdentity| -> Result<(), ValidationError> {
            Err(ValidationError::new("frozen"))
        };
        let err = store
            .update_count(&ctx(), &offer.with_count(1), &veto)
            .unwrap_err();
        assert_eq!(err.to_string(), "storage offer update count: validation: frozen");
        assert_eq!(store.list_offers_by_name(&ctx(), &apple()).unwrap()[0].count, 5);
    }

    #[test]
    fn remove_missing_line_is_noop() {
        let store = InMemoryOfferStore::new();
        let offer = mk_offer("V1", "apple", "1.50", 5);
        store.add(&ctx(), &offer, &accept_offer).unwrap();
        store
            .remove(&ctx(), &offer.with_price(Price::from_hundredths(1)))
            .unwrap();
        assert_eq!(store.list_offers_by_name(&ctx(), &apple()).unwrap().len(), 1);
        store.remove(&ctx(), &offer).unwrap();
        assert!(store.list_offers_by_name(&ctx(), &apple()).unwrap().is_empty());
    }

    #[test]
    fn tables_are_isolated_and_lazy() {
        let store = InMemoryOfferStore::new();
        assert!(store.tables().is_empty());
        let buy = CallContext::new(Ledger::Buy.table_name());
        store
            .add(&buy, &mk_offer("V1", "apple", "1.00", 1), &accept_offer)
            .unwrap();
        assert!(store.list_offers_by_name(&ctx(), &apple()).unwrap().is_empty());
        assert_eq!(store.tables().len(), 2);
    }

    #[test]
    fn cancelled_context_is_rejected() {
        let store = InMemoryOfferStore::new();
        let token = CancelToken::new();
        token.cancel();
        let err = store
            .add(
                &ctx().with_cancel(token),
                &mk_offer("V1", "apple", "1.00", 1),
                &accept_offer,
            )
            .unwrap_err();
        assert_eq!(err.kind(), &StorageErrorKind::Cancelled);
        assert!(store.tables().is_empty());
    }

    #[test]
    fn validator_may_read_the_store() {
        let store = InMemoryOfferStore::new();
        let offer = mk_offer("V1", "apple", "1.50", 5);
        let reject_existing = |o: &VendorOffer| -> Result<(), ValidationError> {
            let listed = store
                .list_offers_by_identity(&ctx(), &o.vendor)
                .map_err(|e| ValidationError::new(e.to_string()))?;
            match listed.iter().any(|l| l.same_line(o)) {
                true => Err(ValidationError::new("line already listed")),
                false => Ok(()),
            }
        };

        store.add(&ctx(), &offer, &reject_existing).unwrap();
        let err = store.add(&ctx(), &offer, &reject_existing).unwrap_err();
        assert!(err.is_validation());

        let below_current = |p: Price, v: &VendorIdentity| -> Result<(), ValidationError> {
            let listed = store
                .list_offers_by_identity(&ctx(), v)
                .map_err(|e| ValidationError::new(e.to_string()))?;
            match listed.iter().all(|l| p < l.product.price) {
                true => Ok(()),
                false => Err(ValidationError::new("price may only drop")),
            }
        };
        store
            .update_price(&ctx(), &offer, Price::from_hundredths(120), &below_current)
            .unwrap();
        assert_eq!(
            store.list_offers_by_name(&ctx(), &apple()).unwrap(),
            vec![offer.with_price(Price::from_hundredths(120))]
        );
    }
}
