//! Storage and Durability Mode Tests
//!
//! The same workload must behave identically on an ephemeral database and
//! on persistent ones in every durability mode.

use crate::common::*;

fn workload(test_db: &TestDb) -> (Vec<String>, Vec<String>, u64) {
    let conn = test_db.conn();
    seed_orders(&conn, &test_db.orders, 30);
    conn.read_write_transaction(|txn| {
        let mut col = txn.read_write(&test_db.orders)?;
        col.remove_value_with_key("o0003")?;
        let mut closed = col.value_for_key("o0000")?.expect("seeded").as_ref().clone();
        closed.open = false;
        col.set_value(closed, "o0000")?;
        Ok(())
    })
    .unwrap();

    conn.read_transaction(|txn| {
        let col = txn.read(&test_db.orders)?;
        let keys = col.all_keys()?;
        let party = col.search(&test_db.orders.fts, "birthday")?;
        let open = col.count_values_where(
            &test_db.orders.index,
            "open",
            &IndexPredicate::Equals(true.into()),
        )?;
        Ok((keys, party, open))
    })
    .unwrap()
}

#[test]
fn ephemeral_and_persistent_agree() {
    let ephemeral = workload(&TestDb::new_in_memory());
    let persistent = workload(&TestDb::new_persistent());
    let always = workload(&TestDb::new_with_config(TurfConfig {
        durability: "always".to_string(),
        ..TurfConfig::default()
    }));

    assert_eq!(ephemeral, persistent);
    assert_eq!(ephemeral, always);
    assert_eq!(ephemeral.0.len(), 29);
    assert_eq!(ephemeral.1, vec!["o0000", "o0010", "o0020"]);
    assert_eq!(ephemeral.2, 28);
}

#[test]
fn persistent_state_survives_reopen() {
    let test_db = TestDb::new_persistent();
    let before = workload(&test_db);

    let test_db = test_db.reopen();
    let conn = test_db.conn();
    let after = conn
        .read_transaction(|txn| {
            let col = txn.read(&test_db.orders)?;
            let keys = col.all_keys()?;
            let party = col.search(&test_db.orders.fts, "birthday")?;
            let open = col.count_values_where(
                &test_db.orders.index,
                "open",
                &IndexPredicate::Equals(true.into()),
            )?;
            Ok((keys, party, open))
        })
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn ephemeral_database_has_no_directory() {
    let test_db = TestDb::new_in_memory();
    assert!(test_db.db.is_ephemeral());
    assert!(test_db.db.data_dir().is_none());

    let persistent = TestDb::new_persistent();
    assert!(!persistent.db.is_ephemeral());
    assert!(persistent.db.data_dir().is_some());
}
