//! Workflow Tests
//!
//! A service shift: several terminals (connections) open orders, attach
//! menu items and close orders, while a kitchen display keeps a running
//! tally through a permanent observer.

use crate::common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use turfdb::{Change, ChangeSet};

fn add_menu(conn: &Connection, menu: &MenuItems) {
    conn.read_write_transaction(|txn| {
        let mut col = txn.read_write(menu)?;
        for (id, title, price) in [("m1", "Burger", 1200), ("m2", "Fries", 450), ("m3", "Soda", 300)] {
            col.set_value(
                MenuItem {
                    id: id.to_string(),
                    title: title.to_string(),
                    price_cents: price,
                },
                id,
            )?;
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn terminals_share_one_consistent_floor() {
    let test_db = TestDb::new_in_memory();
    let front = test_db.conn();
    let bar = test_db.conn();
    let kitchen = test_db.conn();
    add_menu(&front, &test_db.menu);

    let inserted = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&inserted);
    kitchen
        .read_transaction(|txn| {
            txn.read(&test_db.orders)?
                .register_permanent_change_set_observer(move |cs: &ChangeSet| {
                    let new = cs
                        .changes()
                        .iter()
                        .filter(|c| matches!(c, Change::Inserted(_)))
                        .count();
                    sink.fetch_add(new, Ordering::SeqCst);
                });
            Ok(())
        })
        .unwrap();

    front
        .read_write_transaction(|txn| {
            let mut orders = txn.read_write(&test_db.orders)?;
            let mut order = Order::new("o1", 4, "window seat");
            order.items = vec!["m1".into(), "m2".into()];
            orders.set_value(order, "o1")?;
            Ok(())
        })
        .unwrap();

    bar.read_write_transaction(|txn| {
        let mut orders = txn.read_write(&test_db.orders)?;
        let mut order = Order::new("o2", 12, "bar stools");
        order.items = vec!["m3".into()];
        orders.set_value(order, "o2")?;
        Ok(())
    })
    .unwrap();

    // front closes o1 after seeing the bar's order
    front
        .read_write_transaction(|txn| {
            let mut orders = txn.read_write(&test_db.orders)?;
            assert!(orders.contains_key("o2")?);
            let mut order = orders.value_for_key("o1")?.expect("o1").as_ref().clone();
            order.open = false;
            orders.set_value(order, "o1")?;
            Ok(())
        })
        .unwrap();

    assert_eq!(inserted.load(Ordering::SeqCst), 2);

    kitchen
        .read_transaction(|txn| {
            let mut orders = txn.read(&test_db.orders)?;
            let open = orders.find_values_where(
                &test_db.orders.index,
                "open",
                &IndexPredicate::Equals(true.into()),
            )?;
            assert_eq!(open.len(), 1);
            assert_eq!(open[0].id, "o2");

            let items = orders.destination_keys(&test_db.orders.items, "items", "o1")?;
            assert_eq!(items, vec!["m1", "m2"]);
            let fries_orders = orders.source_keys(&test_db.orders.items, "items", "m2")?;
            assert_eq!(fries_orders, vec!["o1"]);
            drop(orders);

            let mut menu = txn.read(&test_db.menu)?;
            let total: i64 = menu
                .values_for_keys(&items[..])?
                .iter()
                .map(|m| m.price_cents)
                .sum();
            assert_eq!(total, 1650);
            Ok(())
        })
        .unwrap();

    assert_eq!(front.snapshot(), bar.snapshot() + 1);
}

#[test]
fn end_of_shift_clears_orders_but_keeps_menu() {
    let test_db = TestDb::new_in_memory();
    let conn = test_db.conn();
    add_menu(&conn, &test_db.menu);
    seed_orders(&conn, &test_db.orders, 40);

    conn.read_write_transaction(|txn| txn.read_write(&test_db.orders)?.remove_all_values())
        .unwrap();

    conn.read_transaction(|txn| {
        let orders = txn.read(&test_db.orders)?;
        assert_eq!(orders.number_of_keys()?, 0);
        assert!(orders.search(&test_db.orders.fts, "birthday")?.is_empty());
        assert_eq!(
            orders.count_values_where(&test_db.orders.index, "open", &IndexPredicate::IsNotNull)?,
            0
        );
        drop(orders);
        assert_eq!(txn.read(&test_db.menu)?.number_of_keys()?, 3);
        Ok(())
    })
    .unwrap();
}
