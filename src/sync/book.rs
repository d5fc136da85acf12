// Depth book
// Price-indexed per-side levels maintained by applying depth batches

use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use std::fmt;

use crate::core::types::{DepthCommand, DepthRecord, Side};
use crate::sync::diagnostics::AnomalyKind;

type Price = OrderedFloat<f32>;

/// Resting quantity and order count at one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    pub quantity: u32,
    pub num_orders: u16,
}

/// One side of the book at its best price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestQuote {
    pub price: f32,
    pub quantity: u32,
    pub num_orders: u16,
}

/// The running depth book for one contract-day.
///
/// BTreeMap keeps each side ordered by price, so best-of-side is the first or
/// last entry and iteration order is defined - a requirement for the
/// deterministic outputs downstream. Violated stream invariants are repaired
/// in place and reported as anomalies; nothing here halts processing.
#[derive(Debug, Clone, Default)]
pub struct Book {
    bids: BTreeMap<Price, Level>,
    asks: BTreeMap<Price, Level>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Apply one depth record. Returns the anomaly the record provoked, if
    /// any; the repair has already been made.
    pub fn apply(&mut self, rec: &DepthRecord) -> Option<AnomalyKind> {
        let price = OrderedFloat(rec.price);
        let level = Level {
            quantity: rec.quantity,
            num_orders: rec.num_orders,
        };
        match rec.command {
            DepthCommand::ClearBook => {
                self.clear();
                None
            }
            DepthCommand::AddBidLevel | DepthCommand::AddAskLevel => {
                let side = self.side_mut(rec.command.side().unwrap_or(Side::Bid));
                if rec.quantity == 0 {
                    side.remove(&price);
                    return Some(AnomalyKind::NegativeOrZeroQuantity);
                }
                if side.insert(price, level).is_some() {
                    // present already: accepted as a modify
                    return Some(AnomalyKind::AddOverExisting);
                }
                None
            }
            DepthCommand::ModifyBidLevel | DepthCommand::ModifyAskLevel => {
                let side = self.side_mut(rec.command.side().unwrap_or(Side::Bid));
                if rec.quantity == 0 {
                    side.remove(&price);
                    return Some(AnomalyKind::NegativeOrZeroQuantity);
                }
                if side.insert(price, level).is_none() {
                    return Some(AnomalyKind::ModifyMissing);
                }
                None
            }
            DepthCommand::DeleteBidLevel | DepthCommand::DeleteAskLevel => {
                let side = self.side_mut(rec.command.side().unwrap_or(Side::Bid));
                if side.remove(&price).is_none() {
                    return Some(AnomalyKind::DeleteMissing);
                }
                None
            }
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Price, Level> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn side_of(&self, side: Side) -> &BTreeMap<Price, Level> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<BestQuote> {
        self.bids.iter().next_back().map(|(p, l)| BestQuote {
            price: p.0,
            quantity: l.quantity,
            num_orders: l.num_orders,
        })
    }

    pub fn best_ask(&self) -> Option<BestQuote> {
        self.asks.iter().next().map(|(p, l)| BestQuote {
            price: p.0,
            quantity: l.quantity,
            num_orders: l.num_orders,
        })
    }

    pub fn depth_of(&self, side: Side, price: f32) -> Option<Level> {
        self.side_of(side).get(&OrderedFloat(price)).copied()
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    /// True when both sides are populated and best-bid >= best-ask.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }
}

impl fmt::Display for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Book(bids={}, asks={}, best_bid={:?}, best_ask={:?})",
            self.bids.len(),
            self.asks.len(),
            self.best_bid().map(|q| q.price),
            self.best_ask().map(|q| q.price)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(command: DepthCommand, price: f32, quantity: u32, num_orders: u16) -> DepthRecord {
        DepthRecord {
            dt_us: 0,
            command,
            flags: 0,
            num_orders,
            price,
            quantity,
            reserved: 0,
        }
    }

    #[test]
    fn test_best_of_side() {
        let mut book = Book::new();
        assert!(book.apply(&rec(DepthCommand::AddBidLevel, 100.00, 5, 2)).is_none());
        assert!(book.apply(&rec(DepthCommand::AddBidLevel, 99.75, 1, 1)).is_none());
        assert!(book.apply(&rec(DepthCommand::AddAskLevel, 100.25, 3, 1)).is_none());
        assert!(book.apply(&rec(DepthCommand::AddAskLevel, 100.50, 7, 3)).is_none());

        let bid = book.best_bid().unwrap();
        assert_eq!(bid.price, 100.00);
        assert_eq!(bid.quantity, 5);
        assert_eq!(bid.num_orders, 2);

        let ask = book.best_ask().unwrap();
        assert_eq!(ask.price, 100.25);
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_clear_empties_both_sides() {
        let mut book = Book::new();
        book.apply(&rec(DepthCommand::AddBidLevel, 100.00, 5, 1));
        book.apply(&rec(DepthCommand::AddAskLevel, 100.25, 3, 1));
        book.apply(&rec(DepthCommand::ClearBook, 0.0, 0, 0));
        assert_eq!(book.bid_levels(), 0);
        assert_eq!(book.ask_levels(), 0);
        assert!(book.best_bid().is_none());
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn test_add_over_existing_becomes_modify() {
        let mut book = Book::new();
        book.apply(&rec(DepthCommand::AddBidLevel, 100.00, 5, 1));
        let anomaly = book.apply(&rec(DepthCommand::AddBidLevel, 100.00, 9, 4));
        assert_eq!(anomaly, Some(AnomalyKind::AddOverExisting));
        let level = book.depth_of(Side::Bid, 100.00).unwrap();
        assert_eq!(level.quantity, 9);
        assert_eq!(level.num_orders, 4);
    }

    #[test]
    fn test_modify_missing_inserts() {
        let mut book = Book::new();
        let anomaly = book.apply(&rec(DepthCommand::ModifyAskLevel, 101.00, 2, 1));
        assert_eq!(anomaly, Some(AnomalyKind::ModifyMissing));
        assert_eq!(book.depth_of(Side::Ask, 101.00).unwrap().quantity, 2);
    }

    #[test]
    fn test_delete_missing_is_ignored() {
        let mut book = Book::new();
        let anomaly = book.apply(&rec(DepthCommand::DeleteBidLevel, 100.00, 0, 0));
        assert_eq!(anomaly, Some(AnomalyKind::DeleteMissing));
        assert_eq!(book.bid_levels(), 0);
    }

    #[test]
    fn test_delete_removes_level() {
        let mut book = Book::new();
        book.apply(&rec(DepthCommand::AddAskLevel, 100.25, 3, 1));
        assert!(book.apply(&rec(DepthCommand::DeleteAskLevel, 100.25, 0, 0)).is_none());
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn test_zero_quantity_removes_and_flags() {
        let mut book = Book::new();
        book.apply(&rec(DepthCommand::AddBidLevel, 100.00, 5, 1));
        let anomaly = book.apply(&rec(DepthCommand::ModifyBidLevel, 100.00, 0, 0));
        assert_eq!(anomaly, Some(AnomalyKind::NegativeOrZeroQuantity));
        assert!(book.depth_of(Side::Bid, 100.00).is_none());
    }

    #[test]
    fn test_crossed_book_detection() {
        let mut book = Book::new();
        book.apply(&rec(DepthCommand::AddBidLevel, 100.50, 5, 1));
        book.apply(&rec(DepthCommand::AddAskLevel, 100.25, 3, 1));
        assert!(book.is_crossed());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut book = Book::new();
        book.apply(&rec(DepthCommand::AddBidLevel, 100.00, 5, 1));
        let mut probe = book.clone();
        probe.apply(&rec(DepthCommand::DeleteBidLevel, 100.00, 0, 0));
        assert!(probe.best_bid().is_none());
        assert_eq!(book.best_bid().unwrap().price, 100.00);
    }
}
