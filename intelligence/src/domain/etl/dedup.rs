//! Within-job deduplication.
//!
//! Runs after normalization (identity includes the resolved category)
//! and before persistence. Candidates are grouped by normalized name +
//! category, then merged into the first surviving row whose prices are
//! within the 1% tolerance of the candidate's. Comparing actual prices
//! — not bucket indices — is what makes the tolerance hold for every
//! pair, including ones that straddle a bucket-cell edge; the survivor's
//! fingerprint is stamped from its final values, so every merged row
//! shares it.
//!
//! Merging keeps the first occurrence's name and description, the
//! lowest retail price, and the union of raw maps.

use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use super::ExtractedProduct;
use crate::utils::fingerprint::{fingerprint, prices_within_tolerance};
use crate::utils::text::normalize;

/// Dedup result: survivors in first-seen order, with fingerprints
/// assigned from their final (post-merge) values.
#[derive(Debug)]
pub struct DedupOutcome {
    pub products: Vec<ExtractedProduct>,
    pub duplicates_removed: u64,
}

/// Price-free identity: two rows can only ever merge inside the same
/// (normalized name, category) group.
fn group_key(name: &str, category_id: Option<Uuid>) -> String {
    let mut key = normalize(name);
    key.push('|');
    if let Some(category_id) = category_id {
        key.push_str(&category_id.to_string());
    }
    key
}

/// Wholesale prices are comparable when both are absent or both are
/// present within tolerance; a row with a wholesale price is never the
/// same offer as one without.
fn wholesale_compatible(a: Option<Decimal>, b: Option<Decimal>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => prices_within_tolerance(a, b),
        _ => false,
    }
}

pub fn dedup(products: Vec<ExtractedProduct>) -> DedupOutcome {
    let mut survivors: Vec<ExtractedProduct> = Vec::with_capacity(products.len());
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    let mut duplicates_removed = 0u64;

    for product in products {
        let key = group_key(&product.name, product.category_id);
        let members = groups.entry(key).or_default();

        // Tolerance is judged against the survivor's current prices, so
        // the first occurrence acts as the group's representative.
        let merge_target = members.iter().copied().find(|&index| {
            let kept = &survivors[index];
            prices_within_tolerance(kept.retail_price, product.retail_price)
                && wholesale_compatible(kept.wholesale_price, product.wholesale_price)
        });

        match merge_target {
            Some(index) => {
                let kept = &mut survivors[index];
                if product.retail_price < kept.retail_price {
                    kept.retail_price = product.retail_price;
                }
                for (k, v) in product.raw {
                    kept.raw.entry(k).or_insert(v);
                }
                duplicates_removed += 1;
            }
            None => {
                members.push(survivors.len());
                survivors.push(product);
            }
        }
    }

    // Assign fingerprints from final values so persisted identity
    // matches what the merge produced.
    for product in &mut survivors {
        product.fingerprint = Some(fingerprint(
            &product.name,
            product.wholesale_price,
            product.retail_price,
            product.category_id,
        ));
    }

    DedupOutcome {
        products: survivors,
        duplicates_removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fingerprint::price_bucket;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn product(name: &str, retail: Decimal) -> ExtractedProduct {
        ExtractedProduct {
            name: name.to_string(),
            description: None,
            wholesale_price: None,
            retail_price: retail,
            category_path: Vec::new(),
            raw: BTreeMap::new(),
            category_id: None,
            fingerprint: None,
        }
    }

    #[test]
    fn test_identical_products_collapse() {
        let outcome = dedup(vec![
            product("Cable", dec!(9.99)),
            product("Cable", dec!(9.99)),
            product("Hub", dec!(19.99)),
        ]);
        assert_eq!(outcome.products.len(), 2);
        assert_eq!(outcome.duplicates_removed, 1);
    }

    #[test]
    fn test_price_within_tolerance_collapses_and_keeps_lowest() {
        let outcome = dedup(vec![
            product("Cable", dec!(99.50)),
            product("Cable", dec!(99.00)),
        ]);
        assert_eq!(outcome.products.len(), 1);
        assert_eq!(outcome.products[0].retail_price, dec!(99.00));
        assert_eq!(outcome.duplicates_removed, 1);
    }

    #[test]
    fn test_bucket_edge_straddling_pair_still_collapses() {
        // 100.00 vs 101.00: 0.99% apart, but the pair lands in two
        // different bucket cells. The merge must not depend on bucket
        // equality.
        assert_ne!(
            price_bucket(Some(dec!(100.00))),
            price_bucket(Some(dec!(101.00)))
        );

        let outcome = dedup(vec![
            product("Cable", dec!(101.00)),
            product("Cable", dec!(100.00)),
        ]);
        assert_eq!(outcome.products.len(), 1);
        assert_eq!(outcome.products[0].retail_price, dec!(100.00));
        assert_eq!(outcome.duplicates_removed, 1);

        // Both orderings collapse to one row.
        let reversed = dedup(vec![
            product("Cable", dec!(100.00)),
            product("Cable", dec!(101.00)),
        ]);
        assert_eq!(reversed.products.len(), 1);
    }

    #[test]
    fn test_tolerance_is_against_the_representative() {
        // 101.00 joins 100.00 (0.99%), but 102.00 is 1.96% away from
        // the representative and stays its own row.
        let outcome = dedup(vec![
            product("Cable", dec!(100.00)),
            product("Cable", dec!(101.00)),
            product("Cable", dec!(102.00)),
        ]);
        assert_eq!(outcome.products.len(), 2);
        assert_eq!(outcome.duplicates_removed, 1);
    }

    #[test]
    fn test_distinct_prices_survive() {
        let outcome = dedup(vec![
            product("Cable", dec!(10.00)),
            product("Cable", dec!(50.00)),
        ]);
        assert_eq!(outcome.products.len(), 2);
        assert_eq!(outcome.duplicates_removed, 0);
    }

    #[test]
    fn test_wholesale_presence_distinguishes() {
        let with_wholesale = ExtractedProduct {
            wholesale_price: Some(dec!(8.00)),
            ..product("Cable", dec!(10.00))
        };
        let outcome = dedup(vec![product("Cable", dec!(10.00)), with_wholesale]);
        assert_eq!(outcome.products.len(), 2);
    }

    #[test]
    fn test_first_occurrence_identity_wins() {
        let mut first = product("Cable", dec!(9.99));
        first.description = Some("original".into());
        first.raw.insert("row".into(), "1".into());
        let mut second = product("Cable", dec!(9.99));
        second.description = Some("later".into());
        second.raw.insert("row".into(), "2".into());
        second.raw.insert("sheet".into(), "A".into());

        let outcome = dedup(vec![first, second]);
        let kept = &outcome.products[0];
        assert_eq!(kept.description.as_deref(), Some("original"));
        assert_eq!(kept.raw["row"], "1");
        assert_eq!(kept.raw["sheet"], "A");
    }

    #[test]
    fn test_deterministic_given_same_input() {
        let input = vec![
            product("Cable", dec!(9.99)),
            product("Cable", dec!(9.95)),
            product("Hub", dec!(19.99)),
        ];
        let first = dedup(input.clone());
        let second = dedup(input);
        assert_eq!(first.products, second.products);
        assert_eq!(first.duplicates_removed, second.duplicates_removed);
    }

    #[test]
    fn test_survivors_carry_fingerprints() {
        let outcome = dedup(vec![product("Cable", dec!(9.99))]);
        assert!(outcome.products[0].fingerprint.is_some());
    }
}
