use tempfile::tempdir;
use terndb::{Dn, Entry, TernConfig, TernDb, TernErrorCode, Value};

fn open_plain(dir: &std::path::Path) -> TernDb {
    TernDb::open(TernConfig::new(dir.join("dir.tdb"))).expect("open")
}

fn index_cn(db: &TernDb) {
    db.add(&Entry::new(Dn::new("@INDEXLIST")).with_element("@IDXATTR", vec![Value::from("cn")]))
        .expect("@INDEXLIST");
}

fn person(dn: &str, cn: &[&str]) -> Entry {
    Entry::new(Dn::new(dn)).with_element("cn", cn.iter().map(|v| Value::from(*v)).collect())
}

fn bucket(db: &TernDb, dn: &str) -> Vec<String> {
    db.fetch(&Dn::new(dn))
        .expect("bucket")
        .element("@IDX")
        .map(|el| {
            el.values
                .iter()
                .map(|v| v.as_str().expect("dn text").to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn bucket_missing(db: &TernDb, dn: &str) -> bool {
    matches!(db.fetch(&Dn::new(dn)), Err(e) if e.code() == TernErrorCode::NoSuchObject)
}

#[test]
fn buckets_track_shared_values_exactly() {
    let dir = tempdir().expect("tempdir");
    let db = open_plain(dir.path());
    index_cn(&db);

    // cn is a well-known directory string here, so values fold
    db.add(&person("cn=a,dc=x", &["red", "blue"])).expect("a");
    db.add(&person("cn=b,dc=x", &["red"])).expect("b");

    assert_eq!(bucket(&db, "@INDEX:CN:RED"), vec!["cn=a,dc=x", "cn=b,dc=x"]);
    assert_eq!(bucket(&db, "@INDEX:CN:BLUE"), vec!["cn=a,dc=x"]);

    db.delete(&Dn::new("cn=a,dc=x")).expect("delete a");
    assert_eq!(bucket(&db, "@INDEX:CN:RED"), vec!["cn=b,dc=x"]);
    assert!(bucket_missing(&db, "@INDEX:CN:BLUE"));

    db.delete(&Dn::new("cn=b,dc=x")).expect("delete b");
    assert!(bucket_missing(&db, "@INDEX:CN:RED"));
}

#[test]
fn installing_indexlist_reindexes_existing_entries() {
    let dir = tempdir().expect("tempdir");
    let db = open_plain(dir.path());

    db.add(&person("cn=a,dc=x", &["early"])).expect("a");
    db.add(&person("cn=b,dc=x", &["early"])).expect("b");
    assert!(bucket_missing(&db, "@INDEX:CN:EARLY"));

    index_cn(&db);
    assert_eq!(
        bucket(&db, "@INDEX:CN:EARLY"),
        vec!["cn=a,dc=x", "cn=b,dc=x"]
    );
}

#[test]
fn changing_attribute_syntax_rebuilds_buckets_in_new_canonical_form() {
    let dir = tempdir().expect("tempdir");
    let db = open_plain(dir.path());
    index_cn(&db);
    db.add(&person("cn=a,dc=x", &["Mixed"])).expect("a");
    assert_eq!(bucket(&db, "@INDEX:CN:MIXED"), vec!["cn=a,dc=x"]);

    // switching cn to an octet string stops the case folding
    db.add(
        &Entry::new(Dn::new("@ATTRIBUTES"))
            .with_element("attributes", vec![Value::from("cn:0:OctetString")]),
    )
    .expect("@ATTRIBUTES");

    assert!(bucket_missing(&db, "@INDEX:CN:MIXED"));
    assert_eq!(bucket(&db, "@INDEX:CN:Mixed"), vec!["cn=a,dc=x"]);
}

#[test]
fn one_level_index_lists_direct_children_only() {
    let dir = tempdir().expect("tempdir");
    let db = open_plain(dir.path());

    db.add(&Entry::new(Dn::new("dc=x")).with_element("dc", vec![Value::from("x")]))
        .expect("root");
    db.add(&person("cn=a,dc=x", &["a"])).expect("a");
    db.add(&person("cn=b,dc=x", &["b"])).expect("b");
    db.add(&person("cn=c,ou=p,dc=x", &["c"])).expect("grandchild");

    assert_eq!(bucket(&db, "@IDXONE:DC=X"), vec!["cn=a,dc=x", "cn=b,dc=x"]);
    assert_eq!(bucket(&db, "@IDXONE:OU=P,DC=X"), vec!["cn=c,ou=p,dc=x"]);

    db.delete(&Dn::new("cn=a,dc=x")).expect("delete");
    assert_eq!(bucket(&db, "@IDXONE:DC=X"), vec!["cn=b,dc=x"]);
}

#[test]
fn binary_index_values_are_escaped_deterministically() {
    let dir = tempdir().expect("tempdir");
    let db = open_plain(dir.path());
    db.add(
        &Entry::new(Dn::new("@ATTRIBUTES"))
            .with_element("attributes", vec![Value::from("cn:0:OctetString")]),
    )
    .expect("@ATTRIBUTES");
    index_cn(&db);

    db.add(
        &Entry::new(Dn::new("cn=blob,dc=x"))
            .with_element("cn", vec![Value::new(vec![0x01, b'a', 0xFF])]),
    )
    .expect("add");

    assert_eq!(bucket(&db, "@INDEX:CN:%01a%FF"), vec!["cn=blob,dc=x"]);
}

#[test]
fn unindexed_attributes_create_no_buckets() {
    let dir = tempdir().expect("tempdir");
    let db = open_plain(dir.path());
    index_cn(&db);

    db.add(
        &Entry::new(Dn::new("cn=a,dc=x"))
            .with_element("cn", vec![Value::from("a")])
            .with_element("mail", vec![Value::from("a@x")]),
    )
    .expect("add");

    assert!(bucket_missing(&db, "@INDEX:MAIL:a@x"));
    assert!(bucket_missing(&db, "@INDEX:MAIL:A@X"));
}

#[test]
fn dropping_indexlist_removes_every_bucket() {
    let dir = tempdir().expect("tempdir");
    let db = open_plain(dir.path());
    index_cn(&db);
    db.add(&person("cn=a,dc=x", &["v"])).expect("add");
    assert_eq!(bucket(&db, "@INDEX:CN:V"), vec!["cn=a,dc=x"]);

    db.delete(&Dn::new("@INDEXLIST")).expect("drop indexlist");

    assert!(bucket_missing(&db, "@INDEX:CN:V"));
    // one-level indexing is unconditional
    assert_eq!(bucket(&db, "@IDXONE:DC=X"), vec!["cn=a,dc=x"]);
}
