//! End-to-end tree round trips: fill, close, reopen, read.

use petra_core::block::Settings;
use petra_core::error::Error;
use petra_core::store::{MemStore, ReadAt, WriteAt};
use petra_file::{File, FileConfig};
use petra_schema::{BasicType, Registry, Value};
use petra_tree::{Leaf, TreeConfig, TreeReader, TreeWriter};
use std::sync::Arc;

fn create(store: &Arc<MemStore>) -> File {
    File::create(
        Arc::clone(store) as Arc<dyn WriteAt>,
        "tree.petra",
        FileConfig::default(),
        Arc::new(Registry::new()),
    )
    .unwrap()
}

fn reopen(store: &Arc<MemStore>) -> File {
    File::open(Arc::clone(store) as Arc<dyn ReadAt>, Arc::new(Registry::new())).unwrap()
}

fn f64s(values: &[f64]) -> Value {
    Value::Array(values.iter().map(|&v| Value::F64(v)).collect())
}

#[test]
fn counted_branches_round_trip() {
    // Scenario C: an int32 branch and a variable float64[] branch driven by
    // a count leaf `n`; 10 entries with n = i % 4.
    let store = Arc::new(MemStore::new());
    let mut file = create(&store);
    {
        let mut w = TreeWriter::new(&mut file, "events", "", TreeConfig::default()).unwrap();
        w.add_branch("n", vec![Leaf::scalar("n", BasicType::I32)])
            .unwrap();
        w.add_branch("px", vec![Leaf::var_array("px", BasicType::F64, "n")])
            .unwrap();
        for i in 0..10u64 {
            let n = (i % 4) as i32;
            let values: Vec<f64> = (0..n).map(|j| i as f64 + j as f64 / 10.0).collect();
            w.fill("n", &[Value::I32(n)]).unwrap();
            w.fill("px", &[f64s(&values)]).unwrap();
            w.end_entry().unwrap();
        }
        assert_eq!(w.entries(), 10);
        w.close().unwrap();
    }
    file.close().unwrap();

    let file = reopen(&store);
    let mut r = TreeReader::open(&file, "events").unwrap();
    assert_eq!(r.entries(), 10);
    for i in 0..10u64 {
        let n = (i % 4) as i32;
        let row = r.read_entry(i).unwrap();
        assert_eq!(row[0].0, "n");
        assert_eq!(row[0].1, vec![Value::I32(n)]);
        let want: Vec<f64> = (0..n).map(|j| i as f64 + j as f64 / 10.0).collect();
        assert_eq!(row[1].1, vec![f64s(&want)]);
    }
}

#[test]
fn baskets_partition_the_entry_range() {
    // A tiny basket size forces many baskets; their ranges must tile
    // [0, entries) with no gaps or overlaps.
    let store = Arc::new(MemStore::new());
    let mut file = create(&store);
    let total = 500u64;
    {
        let mut w = TreeWriter::new(
            &mut file,
            "t",
            "",
            TreeConfig {
                basket_size: 256,
                compression: Some(Settings::none()),
            },
        )
        .unwrap();
        w.add_branch("x", vec![Leaf::scalar("x", BasicType::F64)])
            .unwrap();
        for i in 0..total {
            w.fill("x", &[Value::F64(i as f64)]).unwrap();
            w.end_entry().unwrap();
        }
        w.close().unwrap();
    }
    file.close().unwrap();

    let file = reopen(&store);
    let mut r = TreeReader::open(&file, "t").unwrap();
    let baskets: Vec<_> = r.tree().branch("x").unwrap().baskets().to_vec();
    assert!(baskets.len() > 1, "expected multiple baskets");
    let mut next = 0u64;
    for b in &baskets {
        assert_eq!(b.first_entry, next, "gap or overlap in basket ranges");
        assert!(b.nentries > 0);
        next += b.nentries as u64;
    }
    assert_eq!(next, total);

    // Sequential scan sees the written values.
    for i in 0..total {
        assert_eq!(
            r.read_branch_entry("x", i).unwrap(),
            vec![Value::F64(i as f64)]
        );
    }
}

#[test]
fn random_access_across_baskets() {
    let store = Arc::new(MemStore::new());
    let mut file = create(&store);
    {
        let mut w = TreeWriter::new(
            &mut file,
            "t",
            "",
            TreeConfig {
                basket_size: 128,
                compression: None,
            },
        )
        .unwrap();
        w.add_branch("v", vec![Leaf::scalar("v", BasicType::I64)])
            .unwrap();
        for i in 0..200i64 {
            w.fill("v", &[Value::I64(i * i)]).unwrap();
            w.end_entry().unwrap();
        }
        w.close().unwrap();
    }
    file.close().unwrap();

    let file = reopen(&store);
    let mut r = TreeReader::open(&file, "t").unwrap();
    // Jump around; every read must land on the right basket.
    for &i in &[199u64, 0, 150, 3, 77, 198, 1] {
        assert_eq!(
            r.read_branch_entry("v", i).unwrap(),
            vec![Value::I64((i * i) as i64)]
        );
    }
}

#[test]
fn mixed_leaf_shapes_in_one_branch() {
    let store = Arc::new(MemStore::new());
    let mut file = create(&store);
    {
        let mut w = TreeWriter::new(&mut file, "t", "", TreeConfig::default()).unwrap();
        w.add_branch(
            "trk",
            vec![
                Leaf::scalar("ntrk", BasicType::U32),
                Leaf::fixed_array("vtx", BasicType::F32, 3),
                Leaf::var_array("pt", BasicType::F64, "ntrk"),
                Leaf::scalar("flag", BasicType::Bool),
            ],
        )
        .unwrap();
        for i in 0..20u32 {
            let n = i % 3;
            w.fill(
                "trk",
                &[
                    Value::U32(n),
                    Value::Array(vec![
                        Value::F32(1.0),
                        Value::F32(i as f32),
                        Value::F32(-1.0),
                    ]),
                    Value::Array((0..n).map(|j| Value::F64(j as f64)).collect()),
                    Value::Bool(i % 2 == 0),
                ],
            )
            .unwrap();
            w.end_entry().unwrap();
        }
        w.close().unwrap();
    }
    file.close().unwrap();

    let file = reopen(&store);
    let mut r = TreeReader::open(&file, "t").unwrap();
    for i in 0..20u32 {
        let n = i % 3;
        let vals = r.read_branch_entry("trk", i as u64).unwrap();
        assert_eq!(vals[0], Value::U32(n));
        assert_eq!(
            vals[1],
            Value::Array(vec![
                Value::F32(1.0),
                Value::F32(i as f32),
                Value::F32(-1.0)
            ])
        );
        assert_eq!(
            vals[2],
            Value::Array((0..n).map(|j| Value::F64(j as f64)).collect())
        );
        assert_eq!(vals[3], Value::Bool(i % 2 == 0));
    }
}

#[test]
fn dependent_branch_before_count_branch_fails() {
    let store = Arc::new(MemStore::new());
    let mut file = create(&store);
    {
        let mut w = TreeWriter::new(&mut file, "t", "", TreeConfig::default()).unwrap();
        w.add_branch("n", vec![Leaf::scalar("n", BasicType::I32)])
            .unwrap();
        w.add_branch("px", vec![Leaf::var_array("px", BasicType::F64, "n")])
            .unwrap();

        // Write side: filling the dependent branch first is the ordering
        // violation the design guards against.
        assert!(matches!(
            w.fill("px", &[f64s(&[1.0])]),
            Err(Error::CountLeafNotYetRead { .. })
        ));
        // The handle recovers once the count is filled in order.
        w.fill("n", &[Value::I32(1)]).unwrap();
        w.fill("px", &[f64s(&[1.0])]).unwrap();
        w.end_entry().unwrap();
        w.close().unwrap();
    }
    file.close().unwrap();

    // Read side: reading only the dependent branch skips the count leaf.
    let file = reopen(&store);
    let mut r = TreeReader::open(&file, "t").unwrap();
    assert!(matches!(
        r.read_branch_entry("px", 0),
        Err(Error::CountLeafNotYetRead { .. })
    ));
    // Reading in order works, and the counts carry over within the entry.
    assert_eq!(r.read_branch_entry("n", 0).unwrap(), vec![Value::I32(1)]);
    assert_eq!(r.read_branch_entry("px", 0).unwrap(), vec![f64s(&[1.0])]);
}

#[test]
fn wrong_count_value_is_misuse() {
    let store = Arc::new(MemStore::new());
    let mut file = create(&store);
    let mut w = TreeWriter::new(&mut file, "t", "", TreeConfig::default()).unwrap();
    w.add_branch(
        "trk",
        vec![
            Leaf::scalar("n", BasicType::I32),
            Leaf::var_array("pt", BasicType::F64, "n"),
        ],
    )
    .unwrap();
    w.fill("trk", &[Value::I32(2), f64s(&[1.0])]).unwrap_err();
}

#[test]
fn double_fill_and_missing_fill_are_misuse() {
    let store = Arc::new(MemStore::new());
    let mut file = create(&store);
    let mut w = TreeWriter::new(&mut file, "t", "", TreeConfig::default()).unwrap();
    w.add_branch("a", vec![Leaf::scalar("a", BasicType::I32)])
        .unwrap();
    w.add_branch("b", vec![Leaf::scalar("b", BasicType::I32)])
        .unwrap();

    w.fill("a", &[Value::I32(1)]).unwrap();
    assert!(matches!(
        w.fill("a", &[Value::I32(2)]),
        Err(Error::Misuse(_))
    ));
    // `b` was never filled.
    assert!(matches!(w.end_entry(), Err(Error::Misuse(_))));
    w.fill("b", &[Value::I32(3)]).unwrap();
    w.end_entry().unwrap();
}

#[test]
fn compressed_baskets_round_trip() {
    let store = Arc::new(MemStore::new());
    let mut file = create(&store);
    {
        let mut w = TreeWriter::new(
            &mut file,
            "t",
            "",
            TreeConfig {
                basket_size: 4 * 1024,
                compression: None, // inherit the file's zstd setting
            },
        )
        .unwrap();
        w.add_branch("x", vec![Leaf::fixed_array("x", BasicType::F64, 8)])
            .unwrap();
        for i in 0..300u64 {
            let row: Vec<f64> = (0..8).map(|j| (i / 16) as f64 + j as f64).collect();
            w.fill("x", &[f64s(&row)]).unwrap();
            w.end_entry().unwrap();
        }
        w.close().unwrap();
    }
    file.close().unwrap();

    let file = reopen(&store);
    let mut r = TreeReader::open(&file, "t").unwrap();
    let baskets = r.tree().branch("x").unwrap().baskets().to_vec();
    assert!(
        baskets.iter().any(|b| b.nbytes < b.obj_len),
        "expected at least one compressed basket"
    );
    for i in 0..300u64 {
        let want: Vec<f64> = (0..8).map(|j| (i / 16) as f64 + j as f64).collect();
        assert_eq!(r.read_branch_entry("x", i).unwrap(), vec![f64s(&want)]);
    }
}

#[test]
fn entry_out_of_range_is_an_error_and_handle_survives() {
    let store = Arc::new(MemStore::new());
    let mut file = create(&store);
    {
        let mut w = TreeWriter::new(&mut file, "t", "", TreeConfig::default()).unwrap();
        w.add_branch("x", vec![Leaf::scalar("x", BasicType::I32)])
            .unwrap();
        w.fill("x", &[Value::I32(5)]).unwrap();
        w.end_entry().unwrap();
        w.close().unwrap();
    }
    file.close().unwrap();

    let file = reopen(&store);
    let mut r = TreeReader::open(&file, "t").unwrap();
    assert!(r.read_branch_entry("x", 1).is_err());
    assert_eq!(r.read_branch_entry("x", 0).unwrap(), vec![Value::I32(5)]);
}

#[test]
fn tree_on_disk_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.petra");
    {
        let mut file =
            File::create_path(&path, FileConfig::default(), Arc::new(Registry::new())).unwrap();
        let mut w = TreeWriter::new(&mut file, "events", "", TreeConfig::default()).unwrap();
        w.add_branch("e", vec![Leaf::scalar("e", BasicType::F64)])
            .unwrap();
        for i in 0..50u64 {
            w.fill("e", &[Value::F64(i as f64 * 0.5)]).unwrap();
            w.end_entry().unwrap();
        }
        w.close().unwrap();
        file.close().unwrap();
    }
    let file = File::open_path(&path, Arc::new(Registry::new())).unwrap();
    let mut r = TreeReader::open(&file, "events").unwrap();
    assert_eq!(r.entries(), 50);
    assert_eq!(
        r.read_branch_entry("e", 49).unwrap(),
        vec![Value::F64(24.5)]
    );
}
