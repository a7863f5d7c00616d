use std::{hint::black_box, path::Path, sync::Arc};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use keipydb::{transaction::Transaction, KeiPyDB, Scan};
use tempfile::TempDir;

const NUM_ROWS: i32 = 200;

fn open(dir: &Path) -> KeiPyDB {
    KeiPyDB::new(dir.join("db"), 400, 32).unwrap()
}

fn update(db: &KeiPyDB, sql: &str, tx: &Arc<Transaction>) {
    db.planner().execute_update(sql, tx).unwrap();
}

/// A database holding `people(id, name, age)` and `ages(age, label)`
fn populated(with_index: bool) -> (KeiPyDB, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let tx = db.new_tx().unwrap();
    update(&db, "create table people (id int, name varchar(12), age int)", &tx);
    update(&db, "create table ages (age int, label varchar(8))", &tx);
    if with_index {
        update(&db, "create index people_id on people (id)", &tx);
    }
    for i in 0..NUM_ROWS {
        update(
            &db,
            &format!(
                "insert into people (id, name, age) values ({i}, 'user{i}', {})",
                20 + i % 50
            ),
            &tx,
        );
    }
    for age in 20..70 {
        update(
            &db,
            &format!("insert into ages (age, label) values ({age}, 'a{age}')"),
            &tx,
        );
    }
    tx.commit().unwrap();
    (db, dir)
}

fn count(db: &KeiPyDB, sql: &str) -> usize {
    let tx = db.new_tx().unwrap();
    let plan = db.planner().create_query_plan(sql, &tx).unwrap();
    let mut scan = plan.open().unwrap();
    let mut rows = 0;
    while scan.next().unwrap() {
        rows += 1;
    }
    scan.close();
    tx.commit().unwrap();
    rows
}

fn insert_throughput(c: &mut Criterion) {
    c.bench_function("insert 100 rows", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let db = open(dir.path());
                let tx = db.new_tx().unwrap();
                update(&db, "create table t (id int, name varchar(12))", &tx);
                tx.commit().unwrap();
                (db, dir)
            },
            |(db, _dir)| {
                let tx = db.new_tx().unwrap();
                for i in 0..100 {
                    update(
                        &db,
                        &format!("insert into t (id, name) values ({i}, 'n{i}')"),
                        &tx,
                    );
                }
                tx.commit().unwrap();
            },
            BatchSize::PerIteration,
        )
    });
}

fn point_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("point select");
    let (scan_db, _scan_dir) = populated(false);
    group.bench_function("table scan", |b| {
        b.iter(|| count(&scan_db, black_box("select name from people where id = 137")))
    });
    let (index_db, _index_dir) = populated(true);
    group.bench_function("btree index", |b| {
        b.iter(|| count(&index_db, black_box("select name from people where id = 137")))
    });
    group.finish();
}

fn two_table_join(c: &mut Criterion) {
    let (db, _dir) = populated(false);
    c.bench_function("natural join", |b| {
        b.iter(|| count(&db, black_box("select name, label from people, ages where age = age")))
    });
}

criterion_group!(benches, insert_throughput, point_select, two_table_join);
criterion_main!(benches);
