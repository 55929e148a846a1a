//! Stock validation callbacks. Keep logic minimal and deterministic.
//!
//! Each function matches one of the callback shapes the `OfferRepository`
//! port accepts, so it can be passed directly: `repo.add(&ctx, &offer,
//! &validate_new_offer)`.

use crate::{Price, ValidationError, VendorIdentity, VendorOffer};

/// Reject offers with a negative price or count.
pub fn validate_new_offer(offer: &VendorOffer) -> Result<(), ValidationError> {
    if offer.product.price.is_negative() {
        return Err(ValidationError::new(format!(
            "price must not be negative, got {}",
            offer.product.price
        )));
    }
    validate_count_update(offer.count, &offer.vendor)
}

pub fn validate_count_update(count: i64, _vendor: &VendorIdentity) -> Result<(), ValidationError> {
    if count < 0 {
        return Err(ValidationError::new(format!(
            "count must not be negative, got {count}"
        )));
    }
    Ok(())
}

pub fn validate_price_update(price: Price, _vendor: &VendorIdentity) -> Result<(), ValidationError> {
    if price.is_negative() {
        return Err(ValidationError::new(format!(
            "price must not be negative, got {price}"
        )));
    }
    Ok(())
}

pub fn accept_offer(_offer: &VendorOffer) -> Result<(), ValidationError> {
    Ok(())
}

pub fn accept_count(_count: i64, _vendor: &VendorIdentity) -> Result<(), ValidationError> {
    Ok(())
}

pub fn accept_price(_price: Price, _vendor: &VendorIdentity) -> Result<(), ValidationError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Product, ProductName};

    fn offer(price: i64, count: i64) -> VendorOffer {
        VendorOffer::new(
            VendorIdentity::new("V1").unwrap(),
            Product::new(ProductName::new("apple").unwrap(), Price::from_hundredths(price)),
            count,
        )
    }

    #[test]
    fn new_offer_rules() {
        assert!(validate_new_offer(&offer(150, 5)).is_ok());
        assert!(validate_new_offer(&offer(0, 0)).is_ok());
        let err = validate_new_offer(&offer(-1, 5)).unwrap_err();
        assert_eq!(err.message(), "price must not be negative, got -0.01");
        assert!(validate_new_offer(&offer(150, -2)).is_err());
    }

    #[test]
    fn update_rules() {
        let v = VendorIdentity::new("V1").unwrap();
        assert!(validate_count_update(3, &v).is_ok());
        assert!(validate_count_update(-3, &v).is_err());
        assert!(validate_price_update(Price::from_hundredths(99), &v).is_ok());
        assert!(validate_price_update(Price::from_hundredths(-99), &v).is_err());
    }
}
