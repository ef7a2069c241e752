//! Extension tests through collection views
//!
//! Secondary index, full-text search and relationships are maintained in
//! the writing transaction and queried at the reader's snapshot.

mod common;

use common::*;
use std::sync::Arc;
use turf_core::{codec, Collection, Error, Extension, Result};
use turf_engine::{Connection, Database, IndexPredicate, IndexValue};

fn seed_floor(conn: &Connection, checks: &ChecksCollection) {
    conn.read_write_transaction(|txn| {
        let mut col = txn.read_write(checks)?;
        col.set_value(Check::new("c1", "Patio Table"), "c1")?;
        col.set_value(Check::new("c2", "Bar").closed(), "c2")?;
        col.set_value(Check::new("c3", "Patio Corner Patio"), "c3")?;
        let mut unnamed = Check::new("c4", "");
        unnamed.name = None;
        col.set_value(unnamed, "c4")?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_index_queries() {
    let (db, checks, _) = restaurant();
    let conn = db.new_connection();
    seed_floor(&conn, &checks);

    conn.read_transaction(|txn| {
        let mut col = txn.read(&checks)?;
        let open = IndexPredicate::Equals(true.into());
        assert_eq!(col.find_keys_where(&checks.index, "isOpen", &open)?, vec!["c1", "c3", "c4"]);
        assert_eq!(col.count_values_where(&checks.index, "isOpen", &open)?, 3);

        let first = col
            .find_first_value_where(&checks.index, "isOpen", &IndexPredicate::Equals(false.into()))?
            .unwrap();
        assert_eq!(first.uuid, "c2");

        let bar = col.find_values_where(&checks.index, "name", &IndexPredicate::Equals("Bar".into()))?;
        assert_eq!(bar.len(), 1);
        assert_eq!(bar[0].uuid, "c2");

        assert_eq!(
            col.find_keys_where(&checks.index, "name", &IndexPredicate::IsNull)?,
            vec!["c4"]
        );
        assert_eq!(
            col.find_keys_where(&checks.index, "name", &IndexPredicate::Equals(IndexValue::Null))?,
            vec!["c4"]
        );
        // null never compares with a non-null bound
        assert_eq!(
            col.find_keys_where(&checks.index, "name", &IndexPredicate::NotEquals("Bar".into()))?,
            vec!["c1", "c3"]
        );
        assert_eq!(
            col.find_keys_where(
                &checks.index,
                "name",
                &IndexPredicate::In(vec!["Bar".into(), "Patio Table".into()])
            )?,
            vec!["c1", "c2"]
        );
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_prepared_query_is_reused_across_transactions() {
    let (db, checks, _) = restaurant();
    let open_checks = checks
        .index
        .prepare_query("isOpen", IndexPredicate::Equals(true.into()))
        .unwrap();
    let conn = db.new_connection();
    let other = db.new_connection();
    seed_floor(&conn, &checks);

    for c in [&conn, &other] {
        let count = c
            .read_transaction(|txn| txn.read(&checks)?.count_matching(&open_checks))
            .unwrap();
        assert_eq!(count, 3);
    }

    conn.read_write_transaction(|txn| {
        let mut col = txn.read_write(&checks)?;
        col.set_value(Check::new("c1", "Patio Table").closed(), "c1")?;
        assert_eq!(col.keys_matching(&open_checks)?, vec!["c3", "c4"]);
        let first = col.first_value_matching(&open_checks)?.unwrap();
        assert_eq!(first.uuid, "c3");
        Ok(())
    })
    .unwrap();

    other
        .read_transaction(|txn| {
            let mut col = txn.read(&checks)?;
            let values = col.values_matching(&open_checks)?;
            assert_eq!(
                values.iter().map(|c| c.uuid.as_str()).collect::<Vec<_>>(),
                vec!["c3", "c4"]
            );
            Ok(())
        })
        .unwrap();

    let err = checks
        .index
        .prepare_query("tableNumber", IndexPredicate::IsNull)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
}

#[test]
fn test_index_follows_updates_and_removals() {
    let (db, checks, _) = restaurant();
    let conn = db.new_connection();
    seed_floor(&conn, &checks);

    conn.read_write_transaction(|txn| {
        let mut col = txn.read_write(&checks)?;
        col.set_value(Check::new("c1", "Patio Table").closed(), "c1")?;
        col.remove_value_with_key("c3")?;
        // visible to the writing transaction before commit
        assert_eq!(
            col.find_keys_where(&checks.index, "isOpen", &IndexPredicate::Equals(true.into()))?,
            vec!["c4"]
        );
        Ok(())
    })
    .unwrap();

    let closed = conn
        .read_transaction(|txn| {
            txn.read(&checks)?
                .find_keys_where(&checks.index, "isOpen", &IndexPredicate::Equals(false.into()))
        })
        .unwrap();
    assert_eq!(closed, vec!["c1", "c2"]);

    conn.read_write_transaction(|txn| txn.read_write(&checks)?.remove_all_values())
        .unwrap();
    let count = conn
        .read_transaction(|txn| {
            txn.read(&checks)?
                .count_values_where(&checks.index, "isOpen", &IndexPredicate::IsNotNull)
        })
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn test_undeclared_property_is_rejected() {
    let (db, checks, _) = restaurant();
    let conn = db.new_connection();
    let err = conn
        .read_transaction(|txn| {
            txn.read(&checks)?
                .find_keys_where(&checks.index, "tableNumber", &IndexPredicate::IsNull)
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
}

#[test]
fn test_full_text_search_ranks_by_term_frequency() {
    let (db, checks, _) = restaurant();
    let conn = db.new_connection();
    seed_floor(&conn, &checks);

    conn.read_transaction(|txn| {
        let mut col = txn.read(&checks)?;
        assert_eq!(col.search(&checks.fts, "patio")?, vec!["c3", "c1"]);
        assert_eq!(col.search(&checks.fts, "PATIO table")?, vec!["c1"]);
        assert!(col.search(&checks.fts, "kitchen")?.is_empty());
        assert!(col.search(&checks.fts, "the")?.is_empty());

        let values = col.search_values(&checks.fts, "bar")?;
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].uuid, "c2");
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_full_text_search_follows_renames() {
    let (db, checks, _) = restaurant();
    let conn = db.new_connection();
    seed_floor(&conn, &checks);

    conn.read_write_transaction(|txn| {
        txn.read_write(&checks)?
            .set_value(Check::new("c2", "Window Booth"), "c2")?;
        Ok(())
    })
    .unwrap();

    conn.read_transaction(|txn| {
        let col = txn.read(&checks)?;
        assert!(col.search(&checks.fts, "bar")?.is_empty());
        assert_eq!(col.search(&checks.fts, "booth")?, vec!["c2"]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_relationship_lookups_both_directions() {
    let (db, checks, line_items) = restaurant();
    let conn = db.new_connection();

    conn.read_write_transaction(|txn| {
        let mut items = txn.read_write(&line_items)?;
        items.set_value(LineItem::new("l1", "Burger", 1200), "l1")?;
        items.set_value(LineItem::new("l2", "Fries", 450), "l2")?;
        drop(items);
        let mut col = txn.read_write(&checks)?;
        col.set_value(Check::new("c1", "Patio").with_line_items(&["l1", "l2"]), "c1")?;
        col.set_value(Check::new("c2", "Bar").with_line_items(&["l2"]), "c2")?;
        Ok(())
    })
    .unwrap();

    conn.read_transaction(|txn| {
        let col = txn.read(&checks)?;
        assert_eq!(
            col.destination_keys(&checks.relationships, "lineItems", "c1")?,
            vec!["l1", "l2"]
        );
        assert_eq!(
            col.source_keys(&checks.relationships, "lineItems", "l2")?,
            vec!["c1", "c2"]
        );
        assert!(col
            .destination_keys(&checks.relationships, "lineItems", "missing")?
            .is_empty());
        let err = col
            .destination_keys(&checks.relationships, "payments", "c1")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        Ok(())
    })
    .unwrap();

    // removing the source drops its edges; destinations are left alone
    conn.read_write_transaction(|txn| txn.read_write(&checks)?.remove_value_with_key("c1"))
        .unwrap();
    conn.read_transaction(|txn| {
        assert_eq!(
            txn.read(&checks)?
                .source_keys(&checks.relationships, "lineItems", "l2")?,
            vec!["c2"]
        );
        assert_eq!(txn.read(&line_items)?.number_of_keys()?, 2);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_extension_of_another_collection_is_rejected() {
    let (db, checks, _) = restaurant();
    let flaky = FlakyChecksCollection::new("never");
    db.register_collection(&flaky).unwrap();
    let conn = db.new_connection();

    let err = conn
        .read_transaction(|txn| {
            txn.read(&checks)?
                .find_keys_where(&flaky.index, "isOpen", &IndexPredicate::IsNull)
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
}

/// Same value type as `Checks`, but reusing its extensions
struct ClaimingCollection {
    name: String,
    extensions: Vec<Arc<dyn Extension<Check>>>,
}

impl Collection for ClaimingCollection {
    type Value = Check;

    fn name(&self) -> &str {
        &self.name
    }

    fn schema_version(&self) -> u64 {
        1
    }

    fn serialize_value(&self, value: &Check) -> Result<Vec<u8>> {
        codec::to_msgpack(value)
    }

    fn deserialize_value(&self, data: &[u8]) -> Result<Check> {
        codec::from_msgpack(data)
    }

    fn associated_extensions(&self) -> &[Arc<dyn Extension<Check>>] {
        &self.extensions
    }
}

#[test]
fn test_extension_names_are_claimed_by_one_collection() {
    let (db, checks, _) = restaurant();
    let claiming = ClaimingCollection {
        name: "ArchivedChecks".to_string(),
        extensions: vec![checks.index.clone() as Arc<dyn Extension<Check>>],
    };
    let err = db.register_collection(&claiming).unwrap_err();
    assert!(matches!(err, Error::DuplicateExtension(name) if name == "idx_Checks"));
    assert!(!db.registered_collections().contains(&"ArchivedChecks".to_string()));

    let twice = ClaimingCollection {
        name: "ArchivedChecks".to_string(),
        extensions: vec![
            checks.fts.clone() as Arc<dyn Extension<Check>>,
            checks.fts.clone() as Arc<dyn Extension<Check>>,
        ],
    };
    assert!(matches!(
        db.register_collection(&twice),
        Err(Error::DuplicateExtension(_))
    ));
}

#[test]
fn test_concurrent_registrations_cannot_share_an_extension() {
    const CLAIMANTS: usize = 8;
    let db = Database::ephemeral();
    let checks = ChecksCollection::new();
    let barrier = std::sync::Barrier::new(CLAIMANTS);

    let results: Vec<Result<()>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CLAIMANTS)
            .map(|i| {
                let (db, checks, barrier) = (&db, &checks, &barrier);
                scope.spawn(move || {
                    let claiming = ClaimingCollection {
                        name: format!("Archive{}", i),
                        extensions: vec![checks.index.clone() as Arc<dyn Extension<Check>>],
                    };
                    barrier.wait();
                    db.register_collection(&claiming)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::DuplicateExtension(name) if name == "idx_Checks")));
    assert_eq!(db.registered_collections().len(), 1);
}
