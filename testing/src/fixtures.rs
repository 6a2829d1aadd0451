//! Callers, cart lines and a seeded catalogue.

use crate::InMemoryOrderStore;
use orderdesk_core::types::{CartLine, Caller, ProductId, Role, UserId};
use rust_decimal::Decimal;

/// A non-privileged caller with id `id` and email `user{id}@example.com`.
#[must_use]
pub fn customer(id: i64) -> Caller {
    Caller::new(UserId::new(id), format!("user{id}@example.com"), Role::Customer)
}

/// A privileged caller with id `id`.
#[must_use]
pub fn admin(id: i64) -> Caller {
    Caller::new(UserId::new(id), format!("admin{id}@example.com"), Role::Admin)
}

/// A cart line.
#[must_use]
pub const fn line(product: i64, quantity: u32) -> CartLine {
    CartLine::new(ProductId::new(product), quantity)
}

/// Seed users 1..=3 (3 is an admin) and products:
///
/// | id | name   | price | stock |
/// |----|--------|-------|-------|
/// | 1  | Widget | 10.00 | 10    |
/// | 2  | Gadget | 5.50  | 10    |
/// | 3  | Gizmo  | 0.10  | 100   |
pub fn seed_catalogue(store: &InMemoryOrderStore) {
    for id in 1..=3 {
        let caller = if id == 3 { admin(id) } else { customer(id) };
        store.add_user(caller.id, &format!("User {id}"), &caller.email);
    }
    store.add_product(ProductId::new(1), "Widget", Decimal::new(1000, 2), 10);
    store.add_product(ProductId::new(2), "Gadget", Decimal::new(550, 2), 10);
    store.add_product(ProductId::new(3), "Gizmo", Decimal::new(10, 2), 100);
}
