use tempfile::tempdir;
use terndb::{
    Dn, Element, Entry, MOD_ADD, MOD_DELETE, MOD_REPLACE, SequenceKind, TernConfig, TernDb,
    TernErrorCode, Value,
};

/// Opens a fresh store with `cn` declared as an octet string and
/// equality-indexed.
fn open_seeded(dir: &std::path::Path) -> TernDb {
    let db = TernDb::open(TernConfig::new(dir.join("dir.tdb"))).expect("open");
    db.add(
        &Entry::new(Dn::new("@ATTRIBUTES"))
            .with_element("attributes", vec![Value::from("cn:0:OctetString")]),
    )
    .expect("@ATTRIBUTES");
    db.add(&Entry::new(Dn::new("@INDEXLIST")).with_element("@IDXATTR", vec![Value::from("cn")]))
        .expect("@INDEXLIST");
    db
}

fn highest(db: &TernDb) -> u64 {
    db.sequence_number(SequenceKind::Highest).expect("sequence")
}

fn mod_entry(dn: &str, name: &str, flags: u32, values: Vec<Value>) -> Entry {
    let mut e = Entry::new(Dn::new(dn));
    e.add_element(Element::new(name, values).with_flags(flags));
    e
}

fn attr_values(db: &TernDb, dn: &str, name: &str) -> Vec<String> {
    db.fetch(&Dn::new(dn))
        .expect("fetch")
        .element(name)
        .map(|el| {
            el.values
                .iter()
                .map(|v| v.as_str().expect("text value").to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn add_then_get_with_index_and_sequence_bump() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    let base = highest(&db);

    db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("a")]))
        .expect("add");

    let entry = db.fetch(&Dn::new("cn=a,dc=x")).expect("get");
    assert_eq!(entry.dn.as_str(), "cn=a,dc=x");
    assert_eq!(attr_values(&db, "cn=a,dc=x", "cn"), vec!["a"]);
    assert_eq!(attr_values(&db, "@INDEX:CN:a", "@IDX"), vec!["cn=a,dc=x"]);
    assert_eq!(highest(&db), base + 1);
}

#[test]
fn modify_add_value_extends_element_and_index() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("a")]))
        .expect("add");
    let base = highest(&db);

    db.modify(&mod_entry("cn=a,dc=x", "cn", MOD_ADD, vec![Value::from("b")]))
        .expect("modify add");

    assert_eq!(attr_values(&db, "cn=a,dc=x", "cn"), vec!["a", "b"]);
    assert_eq!(attr_values(&db, "@INDEX:CN:b", "@IDX"), vec!["cn=a,dc=x"]);
    assert_eq!(highest(&db), base + 1);
}

#[test]
fn modify_delete_value_updates_index_bucket() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("a")]))
        .expect("add");
    db.modify(&mod_entry("cn=a,dc=x", "cn", MOD_ADD, vec![Value::from("b")]))
        .expect("modify add");

    db.modify(&mod_entry("cn=a,dc=x", "cn", MOD_DELETE, vec![Value::from("a")]))
        .expect("modify delete");

    assert_eq!(attr_values(&db, "cn=a,dc=x", "cn"), vec!["b"]);
    let err = db.fetch(&Dn::new("@INDEX:CN:a")).expect_err("bucket gone");
    assert_eq!(err.code(), TernErrorCode::NoSuchObject);
    assert_eq!(attr_values(&db, "@INDEX:CN:b", "@IDX"), vec!["cn=a,dc=x"]);
}

#[test]
fn rename_moves_entry_and_one_level_index() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("b")]))
        .expect("add");

    db.rename(&Dn::new("cn=a,dc=x"), &Dn::new("cn=c,dc=x"))
        .expect("rename");

    assert_eq!(
        db.fetch(&Dn::new("cn=a,dc=x")).expect_err("old gone").code(),
        TernErrorCode::NoSuchObject
    );
    assert_eq!(attr_values(&db, "cn=c,dc=x", "cn"), vec!["b"]);
    assert_eq!(attr_values(&db, "@IDXONE:DC=X", "@IDX"), vec!["cn=c,dc=x"]);
    assert_eq!(attr_values(&db, "@INDEX:CN:b", "@IDX"), vec!["cn=c,dc=x"]);
}

#[test]
fn duplicate_add_fails_and_leaves_the_store_untouched() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("a")]))
        .expect("first add");
    let seq_before = highest(&db);
    let bytes_before = std::fs::read(dir.path().join("dir.tdb")).expect("read");

    // dc folds case-insensitively; the octet-string cn value must match
    let err = db
        .add(&Entry::new(Dn::new("CN=a,DC=X")).with_element("cn", vec![Value::from("other")]))
        .expect_err("second add collides");
    assert_eq!(err.code(), TernErrorCode::EntryAlreadyExists);

    assert_eq!(highest(&db), seq_before);
    let bytes_after = std::fs::read(dir.path().join("dir.tdb")).expect("read");
    assert_eq!(bytes_before, bytes_after);
    assert_eq!(attr_values(&db, "cn=a,dc=x", "cn"), vec!["a"]);
}

#[test]
fn replace_with_duplicate_values_is_rejected_without_side_effects() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("a")]))
        .expect("add");
    let bytes_before = std::fs::read(dir.path().join("dir.tdb")).expect("read");

    let err = db
        .modify(&mod_entry(
            "cn=a,dc=x",
            "cn",
            MOD_REPLACE,
            vec![Value::from("q"), Value::from("q")],
        ))
        .expect_err("duplicate replace");
    assert_eq!(err.code(), TernErrorCode::AttributeOrValueExists);

    assert_eq!(attr_values(&db, "cn=a,dc=x", "cn"), vec!["a"]);
    assert_eq!(attr_values(&db, "@INDEX:CN:a", "@IDX"), vec!["cn=a,dc=x"]);
    let bytes_after = std::fs::read(dir.path().join("dir.tdb")).expect("read");
    assert_eq!(bytes_before, bytes_after);
}

#[test]
fn sequence_bumps_once_per_write() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    let mut expected = highest(&db);

    db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("a")]))
        .expect("add");
    expected += 1;
    assert_eq!(highest(&db), expected);

    db.modify(&mod_entry("cn=a,dc=x", "cn", MOD_ADD, vec![Value::from("b")]))
        .expect("modify");
    expected += 1;
    assert_eq!(highest(&db), expected);

    // a rename is one externally visible write, whatever it does inside
    db.rename(&Dn::new("cn=a,dc=x"), &Dn::new("cn=r,dc=x"))
        .expect("rename");
    expected += 1;
    assert_eq!(highest(&db), expected);

    db.delete(&Dn::new("cn=r,dc=x")).expect("delete");
    expected += 1;
    assert_eq!(highest(&db), expected);

    assert_eq!(
        db.sequence_number(SequenceKind::Next).expect("next"),
        expected + 1
    );
}

#[test]
fn rename_matches_add_then_delete() {
    let dir_a = tempdir().expect("tempdir");
    let dir_b = tempdir().expect("tempdir");
    let renamed = open_seeded(dir_a.path());
    let manual = open_seeded(dir_b.path());
    for db in [&renamed, &manual] {
        db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("v")]))
            .expect("seed");
    }

    let seq_before = highest(&renamed);
    assert_eq!(seq_before, highest(&manual));

    renamed
        .rename(&Dn::new("cn=a,dc=x"), &Dn::new("cn=b,dc=x"))
        .expect("rename");

    let mut moved = manual.fetch(&Dn::new("cn=a,dc=x")).expect("fetch");
    moved.dn = Dn::new("cn=b,dc=x");
    manual.add(&moved).expect("add new");
    manual.delete(&Dn::new("cn=a,dc=x")).expect("delete old");

    for dn in ["cn=b,dc=x", "@INDEX:CN:v", "@IDXONE:DC=X"] {
        assert_eq!(
            renamed.fetch(&Dn::new(dn)).expect(dn),
            manual.fetch(&Dn::new(dn)).expect(dn),
            "{dn} diverged"
        );
    }
    // entry and index state agree; only the change accounting differs,
    // since the separate add and delete are two writes
    assert_eq!(highest(&renamed), seq_before + 1);
    assert_eq!(highest(&manual), seq_before + 2);
}

#[test]
fn failed_write_rolls_back_every_sub_step() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("a")]))
        .expect("add");
    let bytes_before = std::fs::read(dir.path().join("dir.tdb")).expect("read");

    // the first element re-points the index before the second one fails
    let mut msg = mod_entry("cn=a,dc=x", "cn", MOD_REPLACE, vec![Value::from("z")]);
    msg.add_element(Element::new("cn", vec![Value::from("w")]).with_flags(0));
    let err = db.modify(&msg).expect_err("unknown mod flags");
    assert_eq!(err.code(), TernErrorCode::Protocol);

    let bytes_after = std::fs::read(dir.path().join("dir.tdb")).expect("read");
    assert_eq!(bytes_before, bytes_after);
    assert_eq!(attr_values(&db, "cn=a,dc=x", "cn"), vec!["a"]);
    assert_eq!(attr_values(&db, "@INDEX:CN:a", "@IDX"), vec!["cn=a,dc=x"]);
}

#[test]
fn modify_covers_attribute_level_edge_cases() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    db.add(
        &Entry::new(Dn::new("cn=a,dc=x"))
            .with_element("cn", vec![Value::from("a")])
            .with_element("mail", vec![Value::from("a@x")]),
    )
    .expect("add");

    // add of a brand new attribute appends it
    db.modify(&mod_entry("cn=a,dc=x", "uid", MOD_ADD, vec![Value::from("u1")]))
        .expect("modify add new attr");
    assert_eq!(attr_values(&db, "cn=a,dc=x", "uid"), vec!["u1"]);

    // adding a value that is already present collides
    let err = db
        .modify(&mod_entry("cn=a,dc=x", "cn", MOD_ADD, vec![Value::from("a")]))
        .expect_err("value already on disk");
    assert_eq!(err.code(), TernErrorCode::AttributeOrValueExists);

    // an empty replace deletes the attribute
    db.modify(&mod_entry("cn=a,dc=x", "mail", MOD_REPLACE, Vec::new()))
        .expect("empty replace");
    assert!(db.fetch(&Dn::new("cn=a,dc=x")).expect("fetch").element("mail").is_none());

    // deleting a missing attribute or value reports no-such-attribute
    let err = db
        .modify(&mod_entry("cn=a,dc=x", "mail", MOD_DELETE, Vec::new()))
        .expect_err("attribute is gone");
    assert_eq!(err.code(), TernErrorCode::NoSuchAttribute);
    let err = db
        .modify(&mod_entry("cn=a,dc=x", "cn", MOD_DELETE, vec![Value::from("zz")]))
        .expect_err("value never existed");
    assert_eq!(err.code(), TernErrorCode::NoSuchAttribute);

    // a whole-attribute delete drops values and index entries together
    db.modify(&mod_entry("cn=a,dc=x", "cn", MOD_DELETE, Vec::new()))
        .expect("delete attribute");
    assert!(db.fetch(&Dn::new("cn=a,dc=x")).expect("fetch").element("cn").is_none());
    assert_eq!(
        db.fetch(&Dn::new("@INDEX:CN:a")).expect_err("bucket gone").code(),
        TernErrorCode::NoSuchObject
    );
}

#[test]
fn missing_targets_surface_no_such_object() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    for result in [
        db.delete(&Dn::new("cn=missing,dc=x")).expect_err("delete"),
        db.modify(&mod_entry("cn=missing,dc=x", "cn", MOD_ADD, vec![Value::from("a")]))
            .expect_err("modify"),
        db.rename(&Dn::new("cn=missing,dc=x"), &Dn::new("cn=n,dc=x"))
            .expect_err("rename"),
        db.fetch(&Dn::new("cn=missing,dc=x")).map(|_| ()).expect_err("fetch"),
    ] {
        assert_eq!(result.code(), TernErrorCode::NoSuchObject);
    }
}

#[test]
fn case_only_rename_keeps_a_single_entry() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());
    // ou keeps its well-known directory-string syntax, so these DNs
    // casefold to the same key
    db.add(&Entry::new(Dn::new("ou=Widget,dc=x")).with_element("ou", vec![Value::from("w")]))
        .expect("add");

    db.rename(&Dn::new("ou=Widget,dc=x"), &Dn::new("OU=WIDGET,DC=X"))
        .expect("case rename");

    let entry = db.fetch(&Dn::new("ou=widget,dc=x")).expect("fetch");
    assert_eq!(entry.dn.as_str(), "OU=WIDGET,DC=X");
    assert_eq!(attr_values(&db, "@IDXONE:DC=X", "@IDX"), vec!["OU=WIDGET,DC=X"]);
}

#[test]
fn explicit_transactions_commit_and_cancel() {
    let dir = tempdir().expect("tempdir");
    let db = open_seeded(dir.path());

    db.start_transaction().expect("begin");
    db.add(&Entry::new(Dn::new("cn=tmp,dc=x")).with_element("cn", vec![Value::from("t")]))
        .expect("add in tx");
    assert!(db.exists(&Dn::new("cn=tmp,dc=x")).expect("visible in tx"));
    db.cancel_transaction().expect("cancel");
    assert!(!db.exists(&Dn::new("cn=tmp,dc=x")).expect("rolled back"));

    db.start_transaction().expect("begin");
    db.start_transaction().expect("nested begin");
    db.add(&Entry::new(Dn::new("cn=keep,dc=x")).with_element("cn", vec![Value::from("k")]))
        .expect("add in nested tx");
    db.end_transaction().expect("inner end");
    assert!(db.exists(&Dn::new("cn=keep,dc=x")).expect("still open"));
    db.end_transaction().expect("outer end commits");
    assert!(db.exists(&Dn::new("cn=keep,dc=x")).expect("committed"));

    assert_eq!(
        db.end_transaction().expect_err("no tx").code(),
        TernErrorCode::Operations
    );
}

#[test]
fn contended_transaction_lock_times_out() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("dir.tdb");
    let first = TernDb::open(TernConfig::new(&path)).expect("open first");
    let mut quick = TernConfig::new(&path);
    quick.lock_timeout_ms = 50;
    let second = TernDb::open(quick).expect("open second");

    first.start_transaction().expect("hold the store lock");
    let err = second.start_transaction().expect_err("locked out");
    assert_eq!(err.code(), TernErrorCode::TimeLimitExceeded);
    first.cancel_transaction().expect("release");
}

#[test]
fn bad_attributes_tuple_is_invalid_attribute_syntax() {
    let dir = tempdir().expect("tempdir");
    let db = TernDb::open(TernConfig::new(dir.path().join("dir.tdb"))).expect("open");
    let err = db
        .add(
            &Entry::new(Dn::new("@ATTRIBUTES"))
                .with_element("attributes", vec![Value::from("cn:notamask")]),
        )
        .expect_err("bad tuple");
    assert_eq!(err.code(), TernErrorCode::InvalidAttributeSyntax);
    assert!(!db.exists(&Dn::new("@ATTRIBUTES")).expect("nothing written"));
}

#[test]
fn reopen_preserves_entries_and_sequence() {
    let dir = tempdir().expect("tempdir");
    let seq = {
        let db = open_seeded(dir.path());
        db.add(&Entry::new(Dn::new("cn=a,dc=x")).with_element("cn", vec![Value::from("a")]))
            .expect("add");
        highest(&db)
    };
    let db = TernDb::open(TernConfig::new(dir.path().join("dir.tdb"))).expect("reopen");
    assert_eq!(attr_values(&db, "cn=a,dc=x", "cn"), vec!["a"]);
    assert_eq!(highest(&db), seq);
}
