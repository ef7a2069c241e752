//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;
pub use turfdb::{
    codec, Collection, Connection, Database, Extension, FtsProperty, FullTextSearch,
    IndexPredicate, IndexedProperty, RelationshipIndex, Result, SecondaryIndex,
    ToManyRelationship, TurfConfig,
};

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub table: u32,
    pub note: String,
    pub open: bool,
    pub items: Vec<String>,
}

impl Order {
    pub fn new(id: &str, table: u32, note: &str) -> Self {
        Order {
            id: id.to_string(),
            table,
            note: note.to_string(),
            open: true,
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: String,
    pub title: String,
    pub price_cents: i64,
}

/// Orders with an index on `table` and `open`, search over `note`, and a
/// to-many relationship to `MenuItems`
pub struct Orders {
    pub index: Arc<SecondaryIndex<Order>>,
    pub fts: Arc<FullTextSearch<Order>>,
    pub items: Arc<RelationshipIndex<Order>>,
    extensions: Vec<Arc<dyn Extension<Order>>>,
    capacity: Option<usize>,
}

impl Orders {
    pub fn new() -> Self {
        Self::with_capacity(Some(100))
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        let index = Arc::new(SecondaryIndex::new(
            "Orders",
            vec![
                IndexedProperty::new("table", |o: &Order| o.table),
                IndexedProperty::new("open", |o: &Order| o.open),
            ],
        ));
        let fts = Arc::new(FullTextSearch::new(
            "Orders",
            vec![FtsProperty::new("note", |o: &Order| o.note.clone())],
        ));
        let items = Arc::new(RelationshipIndex::new(
            "Orders",
            vec![ToManyRelationship::new("items", "MenuItems", |o: &Order| {
                o.items.clone()
            })],
        ));
        Orders {
            extensions: vec![
                index.clone() as Arc<dyn Extension<Order>>,
                fts.clone() as Arc<dyn Extension<Order>>,
                items.clone() as Arc<dyn Extension<Order>>,
            ],
            index,
            fts,
            items,
            capacity,
        }
    }
}

impl Collection for Orders {
    type Value = Order;

    fn name(&self) -> &str {
        "Orders"
    }

    fn schema_version(&self) -> u64 {
        1
    }

    fn value_cache_capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn serialize_value(&self, value: &Order) -> Result<Vec<u8>> {
        codec::to_msgpack(value)
    }

    fn deserialize_value(&self, data: &[u8]) -> Result<Order> {
        codec::from_msgpack(data)
    }

    fn associated_extensions(&self) -> &[Arc<dyn Extension<Order>>] {
        &self.extensions
    }
}

pub struct MenuItems;

impl Collection for MenuItems {
    type Value = MenuItem;

    fn name(&self) -> &str {
        "MenuItems"
    }

    fn schema_version(&self) -> u64 {
        1
    }

    fn serialize_value(&self, value: &MenuItem) -> Result<Vec<u8>> {
        codec::to_msgpack(value)
    }

    fn deserialize_value(&self, data: &[u8]) -> Result<MenuItem> {
        codec::from_msgpack(data)
    }
}

// ============================================================================
// TestDb
// ============================================================================

/// Database with `Orders` and `MenuItems` registered; holds its directory
/// alive when persistent
pub struct TestDb {
    pub db: Database,
    pub orders: Orders,
    pub menu: MenuItems,
    pub dir: Option<TempDir>,
}

impl TestDb {
    pub fn new_in_memory() -> Self {
        Self::register(Database::ephemeral(), None)
    }

    pub fn new_persistent() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open(dir.path()).expect("open db");
        Self::register(db, Some(dir))
    }

    pub fn new_with_config(config: TurfConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open_with_config(dir.path(), config).expect("open db");
        Self::register(db, Some(dir))
    }

    fn register(db: Database, dir: Option<TempDir>) -> Self {
        let orders = Orders::new();
        db.register_collection(&orders).expect("register orders");
        db.register_collection(&MenuItems).expect("register menu");
        TestDb {
            db,
            orders,
            menu: MenuItems,
            dir,
        }
    }

    /// Drop the open instance and open the same directory again
    pub fn reopen(self) -> Self {
        let TestDb { db, dir, .. } = self;
        drop(db);
        let dir = dir.expect("reopen needs a persistent database");
        let db = Database::open(dir.path()).expect("reopen db");
        Self::register(db, Some(dir))
    }

    pub fn conn(&self) -> Connection {
        self.db.new_connection()
    }
}

/// Insert `count` orders `o0000..` spread over 20 tables
pub fn seed_orders(conn: &Connection, orders: &Orders, count: usize) {
    conn.read_write_transaction(|txn| {
        let mut col = txn.read_write(orders)?;
        for i in 0..count {
            let id = format!("o{:04}", i);
            let note = if i % 10 == 0 { "birthday party" } else { "regular" };
            col.set_value(Order::new(&id, (i % 20) as u32, note), &id)?;
        }
        Ok(())
    })
    .expect("seed orders");
}
