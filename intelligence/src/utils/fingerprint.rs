//! Product fingerprint for within-job deduplication.
//!
//! The fingerprint hashes the normalized name, both price buckets and
//! the resolved category. Buckets are floor cells on a geometric grid
//! exactly one 2% ratio wide, which gives a hard guarantee in one
//! direction: two prices in the same bucket are always within 2% of
//! each other, so prices further apart can never end up sharing a
//! fingerprint. The other direction — prices within 1% of each other
//! must always collapse, even when they straddle a cell edge — cannot
//! come from any fixed partition of the price line; the deduplicator
//! enforces it by comparing candidate prices against the surviving
//! row with [`prices_within_tolerance`] and stamping that row's
//! fingerprint onto the merge.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::text::normalize;

/// Relative price drift treated as "the same price" (1%).
pub const PRICE_TOLERANCE_PERCENT: i64 = 1;

/// Width of one bucket cell as a price ratio. Two prices share a floor
/// cell on this grid only if their ratio is below it.
const BUCKET_RATIO: f64 = 1.02;

/// Bucket index of a price on the geometric grid. Zero and absent
/// prices share bucket 0.
///
/// Same bucket implies a ratio under [`BUCKET_RATIO`]; it does NOT
/// imply the prices are within the 1% tolerance — that comparison is
/// [`prices_within_tolerance`], applied where merging is decided.
pub fn price_bucket(price: Option<Decimal>) -> i64 {
    let Some(price) = price else { return 0 };
    let value = price.to_f64().unwrap_or(0.0);
    if value <= 0.0 {
        return 0;
    }
    (value.ln() / BUCKET_RATIO.ln()).floor() as i64
}

/// Whether two prices are within the 1% relative tolerance.
pub fn prices_within_tolerance(a: Decimal, b: Decimal) -> bool {
    let diff = (a - b).abs();
    let max = a.max(b);
    if max.is_zero() {
        return diff.is_zero();
    }
    // |a - b| / max <= 1/100, without division.
    diff * Decimal::from(100) <= max * Decimal::from(PRICE_TOLERANCE_PERCENT)
}

/// Fingerprint over (normalized name, wholesale bucket, retail bucket,
/// category or empty).
pub fn fingerprint(
    name: &str,
    wholesale: Option<Decimal>,
    retail: Decimal,
    category_id: Option<Uuid>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(name).as_bytes());
    hasher.update(b"|");
    hasher.update(price_bucket(wholesale).to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(price_bucket(Some(retail)).to_string().as_bytes());
    hasher.update(b"|");
    if let Some(category_id) = category_id {
        hasher.update(category_id.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_prices_within_one_percent_share_a_fingerprint() {
        let a = fingerprint("Patch cable Cat6 1m", None, dec!(99.00), None);
        let b = fingerprint("PATCH CABLE, Cat6 1m!", None, dec!(99.50), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_prices_beyond_two_percent_differ() {
        let a = fingerprint("Patch cable Cat6 1m", None, dec!(100.00), None);
        let b = fingerprint("Patch cable Cat6 1m", None, dec!(103.00), None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_no_bucket_ever_spans_more_than_the_ratio() {
        // Sweep a wide price range: any pair more than 2.1% apart must
        // land in different buckets, whatever the cell edges fall on.
        for cents in (1i64..200_000).step_by(37) {
            let low = Decimal::new(cents, 2);
            let high = low * dec!(1.021);
            assert_ne!(
                price_bucket(Some(low)),
                price_bucket(Some(high)),
                "prices {} and {} share a bucket",
                low,
                high
            );
        }
    }

    #[test]
    fn test_edge_straddling_pair_is_the_dedup_stages_job() {
        // 100.00 and 101.00 differ by 0.99% — inside the tolerance —
        // yet straddle a cell edge on this grid. The raw hashes differ;
        // the deduplicator's tolerance comparison is what collapses
        // them (covered in the dedup tests).
        assert!(prices_within_tolerance(dec!(100.00), dec!(101.00)));
        assert_ne!(
            price_bucket(Some(dec!(100.00))),
            price_bucket(Some(dec!(101.00)))
        );
    }

    #[test]
    fn test_category_distinguishes() {
        let category = Uuid::new_v4();
        let a = fingerprint("Widget", None, dec!(10.00), Some(category));
        let b = fingerprint("Widget", None, dec!(10.00), None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_absent_and_zero_wholesale_share_bucket() {
        let a = fingerprint("Widget", None, dec!(10.00), None);
        let b = fingerprint("Widget", Some(dec!(0)), dec!(10.00), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tolerance_comparison() {
        assert!(prices_within_tolerance(dec!(99.00), dec!(99.50)));
        assert!(prices_within_tolerance(dec!(100.00), dec!(101.00)));
        assert!(prices_within_tolerance(dec!(100), dec!(100)));
        assert!(prices_within_tolerance(dec!(0), dec!(0)));
        assert!(!prices_within_tolerance(dec!(100.00), dec!(102.50)));
        assert!(!prices_within_tolerance(dec!(0), dec!(1)));
    }

    #[test]
    fn test_bucket_is_order_independent() {
        // The bucket depends on the price alone, never on which price
        // was seen first.
        assert_eq!(
            price_bucket(Some(dec!(99.00))),
            price_bucket(Some(dec!(99.50)))
        );
        assert_ne!(
            price_bucket(Some(dec!(100.00))),
            price_bucket(Some(dec!(103.00)))
        );
    }
}
