//! Scale Tests
//!
//! Thousands of values: caches stay within their declared bounds while
//! reads, scans and index queries stay correct.

use crate::common::*;

const ORDERS: usize = 2_000;

#[test]
fn cache_stays_bounded_across_large_scans() {
    let test_db = TestDb::new_in_memory();
    let conn = test_db.conn();
    seed_orders(&conn, &test_db.orders, ORDERS);
    assert_eq!(conn.cached_value_count("Orders"), 100);

    let total = conn
        .read_transaction(|txn| {
            let mut col = txn.read(&test_db.orders)?;
            let mut total = 0u64;
            for i in (0..ORDERS).step_by(7) {
                let id = format!("o{:04}", i);
                total += col.value_for_key(&id)?.map_or(0, |o| o.table as u64);
            }
            Ok(total)
        })
        .unwrap();
    let expected: u64 = (0..ORDERS).step_by(7).map(|i| (i % 20) as u64).sum();
    assert_eq!(total, expected);
    assert!(conn.cached_value_count("Orders") <= 100);
}

#[test]
fn scan_and_index_at_scale() {
    let test_db = TestDb::new_in_memory();
    let conn = test_db.conn();
    seed_orders(&conn, &test_db.orders, ORDERS);

    conn.read_transaction(|txn| {
        let col = txn.read(&test_db.orders)?;
        assert_eq!(col.number_of_keys()?, ORDERS as u64);

        let scanned = col.all_values()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(scanned.len(), ORDERS);
        assert!(scanned.windows(2).all(|w| w[0].id < w[1].id));

        let table_seven = col.count_values_where(
            &test_db.orders.index,
            "table",
            &IndexPredicate::Equals(7.into()),
        )?;
        assert_eq!(table_seven, (ORDERS / 20) as u64);

        let low_tables = col.count_values_where(
            &test_db.orders.index,
            "table",
            &IndexPredicate::LessThan(5.into()),
        )?;
        assert_eq!(low_tables, (ORDERS / 4) as u64);

        assert_eq!(col.search(&test_db.orders.fts, "party")?.len(), ORDERS / 10);
        Ok(())
    })
    .unwrap();
}

#[test]
fn unbounded_cache_holds_everything() {
    let db = Database::ephemeral();
    let orders = Orders::with_capacity(None);
    db.register_collection(&orders).unwrap();
    let conn = db.new_connection();
    seed_orders(&conn, &orders, 500);
    assert_eq!(conn.cached_value_count("Orders"), 500);
}

#[test]
fn zero_capacity_disables_caching() {
    let db = Database::ephemeral();
    let orders = Orders::with_capacity(Some(0));
    db.register_collection(&orders).unwrap();
    let conn = db.new_connection();
    seed_orders(&conn, &orders, 50);
    assert_eq!(conn.cached_value_count("Orders"), 0);

    let found = conn
        .read_transaction(|txn| txn.read(&orders)?.value_for_key("o0042"))
        .unwrap();
    assert_eq!(found.unwrap().table, 2);
    assert_eq!(conn.cached_value_count("Orders"), 0);
}
