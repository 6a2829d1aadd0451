//! Cart validation and normalization.
//!
//! A [`Cart`] is the only way into the coordinator: it guarantees at least
//! one line, positive product ids and quantities, and one line per product.
//! Duplicate product ids are merged (quantities summed) so stock is checked
//! against the aggregate demand, not per line.

use crate::error::OrderError;
use crate::types::{CartLine, ProductId};
use std::collections::HashMap;

/// A validated, normalized cart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cart {
    /// One line per product, in order of first appearance.
    lines: Vec<CartLine>,
}

impl Cart {
    /// Validate and normalize raw cart lines.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Validation`] if the cart is empty, a product id
    /// is not positive, a quantity is zero, or merged quantities overflow.
    pub fn new(raw: impl IntoIterator<Item = CartLine>) -> Result<Self, OrderError> {
        let mut lines: Vec<CartLine> = Vec::new();
        let mut index: HashMap<ProductId, usize> = HashMap::new();

        for line in raw {
            if line.product_id.get() <= 0 {
                return Err(OrderError::Validation(format!(
                    "product_id must be a positive integer, got {}",
                    line.product_id
                )));
            }
            if line.quantity == 0 {
                return Err(OrderError::Validation(format!(
                    "qty for product {} must be a positive integer",
                    line.product_id
                )));
            }

            if let Some(&pos) = index.get(&line.product_id) {
                let merged = &mut lines[pos];
                merged.quantity = merged.quantity.checked_add(line.quantity).ok_or_else(|| {
                    OrderError::Validation(format!(
                        "qty for product {} is too large",
                        line.product_id
                    ))
                })?;
            } else {
                index.insert(line.product_id, lines.len());
                lines.push(line);
            }
        }

        if lines.is_empty() {
            return Err(OrderError::Validation(
                "items must contain at least one line".to_string(),
            ));
        }

        Ok(Self { lines })
    }

    /// Lines in order of first appearance.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Lines sorted by ascending product id: the row-lock acquisition order.
    ///
    /// Every coordinator run locks in this order, so two carts sharing
    /// products always contend on the lowest shared id first and cannot
    /// deadlock against each other.
    #[must_use]
    pub fn lock_order(&self) -> Vec<CartLine> {
        let mut sorted = self.lines.clone();
        sorted.sort_by_key(|line| line.product_id);
        sorted
    }

    /// Number of distinct products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Always `false` for a constructed cart.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line(product: i64, qty: u32) -> CartLine {
        CartLine::new(ProductId::new(product), qty)
    }

    #[test]
    fn rejects_empty_cart() {
        let err = Cart::new(Vec::new()).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[test]
    fn rejects_zero_quantity() {
        let err = Cart::new(vec![line(1, 2), line(2, 0)]).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[test]
    fn rejects_non_positive_product_id() {
        assert!(Cart::new(vec![line(0, 1)]).is_err());
        assert!(Cart::new(vec![line(-3, 1)]).is_err());
    }

    #[test]
    fn merges_duplicates_in_first_appearance_order() {
        let cart = Cart::new(vec![line(5, 1), line(2, 2), line(5, 3)]).unwrap();
        assert_eq!(cart.lines(), &[line(5, 4), line(2, 2)]);
    }

    #[test]
    fn lock_order_is_ascending() {
        let cart = Cart::new(vec![line(9, 1), line(3, 1), line(7, 1)]).unwrap();
        let ids: Vec<i64> = cart
            .lock_order()
            .iter()
            .map(|l| l.product_id.get())
            .collect();
        assert_eq!(ids, vec![3, 7, 9]);
    }

    #[test]
    fn merged_quantity_overflow_is_a_validation_error() {
        let err = Cart::new(vec![line(1, u32::MAX), line(1, 1)]).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    proptest! {
        #[test]
        fn normalization_preserves_demand(
            raw in prop::collection::vec((1i64..20, 1u32..50), 1..30)
        ) {
            let lines: Vec<CartLine> = raw.iter().map(|&(p, q)| line(p, q)).collect();
            let cart = Cart::new(lines).unwrap();

            for product in 1i64..20 {
                let wanted: u32 = raw.iter().filter(|(p, _)| *p == product).map(|(_, q)| q).sum();
                let got: u32 = cart
                    .lines()
                    .iter()
                    .filter(|l| l.product_id.get() == product)
                    .map(|l| l.quantity)
                    .sum();
                prop_assert_eq!(wanted, got);
            }

            let mut ids: Vec<_> = cart.lines().iter().map(|l| l.product_id).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), cart.len());
        }
    }
}
