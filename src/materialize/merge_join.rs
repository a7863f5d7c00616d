use std::{cmp::Ordering, sync::Arc};

use crate::{
    error::DbResult,
    materialize::{SortPlan, SortScan},
    plan::Plan,
    query::{Constant, Scan},
    record::Schema,
    transaction::Transaction,
};

/// Equi-join of two inputs, each sorted on its join field
pub struct MergeJoinPlan {
    left: Arc<dyn Plan>,
    right: SortPlan,
    left_field: String,
    right_field: String,
    schema: Schema,
}

impl MergeJoinPlan {
    pub fn new(
        tx: Arc<Transaction>,
        left: Arc<dyn Plan>,
        right: Arc<dyn Plan>,
        left_field: &str,
        right_field: &str,
    ) -> Self {
        let mut schema = Schema::new();
        schema.add_all(left.schema());
        schema.add_all(right.schema());
        let left = Arc::new(SortPlan::new(
            Arc::clone(&tx),
            left,
            vec![left_field.to_string()],
        ));
        let right = SortPlan::new(tx, right, vec![right_field.to_string()]);
        Self {
            left,
            right,
            left_field: left_field.to_string(),
            right_field: right_field.to_string(),
            schema,
        }
    }
}

impl Plan for MergeJoinPlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        let left = self.left.open()?;
        let right = self.right.open_sort_scan()?;
        Ok(Box::new(MergeJoinScan::new(
            left,
            right,
            &self.left_field,
            &self.right_field,
        )?))
    }

    /// Assumes each group of equal right-side keys fits in the buffer pool, so each side
    /// is read once
    fn blocks_accessed(&self) -> usize {
        self.left.blocks_accessed() + self.right.blocks_accessed()
    }

    fn records_output(&self) -> usize {
        let max_values = self
            .left
            .distinct_values(&self.left_field)
            .max(self.right.distinct_values(&self.right_field))
            .max(1);
        self.left.records_output() * self.right.records_output() / max_values
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        if self.left.schema().has_field(field_name) {
            self.left.distinct_values(field_name)
        } else {
            self.right.distinct_values(field_name)
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Walks both sorted inputs in step, rewinding the right side for each left row that
/// repeats the previous join value
pub struct MergeJoinScan {
    left: Box<dyn Scan>,
    right: SortScan,
    left_field: String,
    right_field: String,
    join_value: Option<Constant>,
}

impl MergeJoinScan {
    pub fn new(
        left: Box<dyn Scan>,
        right: SortScan,
        left_field: &str,
        right_field: &str,
    ) -> DbResult<Self> {
        let mut scan = Self {
            left,
            right,
            left_field: left_field.to_string(),
            right_field: right_field.to_string(),
            join_value: None,
        };
        scan.before_first()?;
        Ok(scan)
    }
}

impl Scan for MergeJoinScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.join_value = None;
        self.left.before_first()?;
        self.right.before_first()
    }

    fn next(&mut self) -> DbResult<bool> {
        let mut has_more_right = self.right.next()?;
        if let Some(join_value) = &self.join_value {
            if has_more_right && self.right.get_value(&self.right_field)? == *join_value {
                return Ok(true);
            }
        }

        let mut has_more_left = self.left.next()?;
        if let Some(join_value) = &self.join_value {
            if has_more_left && self.left.get_value(&self.left_field)? == *join_value {
                self.right.restore_position()?;
                return Ok(true);
            }
        }

        while has_more_left && has_more_right {
            let left_value = self.left.get_value(&self.left_field)?;
            let right_value = self.right.get_value(&self.right_field)?;
            match left_value.cmp(&right_value) {
                Ordering::Less => has_more_left = self.left.next()?,
                Ordering::Greater => has_more_right = self.right.next()?,
                Ordering::Equal => {
                    self.right.save_position()?;
                    self.join_value = Some(right_value);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        if self.left.has_field(field_name) {
            self.left.get_int(field_name)
        } else {
            self.right.get_int(field_name)
        }
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        if self.left.has_field(field_name) {
            self.left.get_string(field_name)
        } else {
            self.right.get_string(field_name)
        }
    }

    fn get_value(&self, field_name: &str) -> DbResult<Constant> {
        if self.left.has_field(field_name) {
            self.left.get_value(field_name)
        } else {
            self.right.get_value(field_name)
        }
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.left.has_field(field_name) || self.right.has_field(field_name)
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
    }
}

#[cfg(test)]
mod merge_join_tests {
    use std::sync::Arc;

    use crate::{
        materialize::MergeJoinPlan,
        plan::{Plan, TablePlan},
        KeiPyDB,
    };

    #[test]
    fn test_merge_join_with_duplicate_keys() {
        let (db, _dir) = KeiPyDB::new_for_test(400, 8);
        let tx = db.new_tx().unwrap();
        let planner = db.planner();
        planner
            .execute_update("create table dept (did int, dname varchar(8))", &tx)
            .unwrap();
        planner
            .execute_update("create table emp (ename varchar(8), edept int)", &tx)
            .unwrap();
        for (did, dname) in [(30, "ops"), (10, "eng"), (20, "sales"), (40, "empty")] {
            planner
                .execute_update(
                    &format!("insert into dept (did, dname) values ({did}, '{dname}')"),
                    &tx,
                )
                .unwrap();
        }
        let emps = [
            ("amy", 20),
            ("bob", 10),
            ("cal", 20),
            ("dee", 30),
            ("eve", 10),
            ("fay", 50),
            ("gus", 20),
        ];
        for (ename, edept) in emps {
            planner
                .execute_update(
                    &format!("insert into emp (ename, edept) values ('{ename}', {edept})"),
                    &tx,
                )
                .unwrap();
        }

        let metadata = db.metadata_manager();
        let dept = Arc::new(TablePlan::new(Arc::clone(&tx), "dept", metadata).unwrap());
        let emp = Arc::new(TablePlan::new(Arc::clone(&tx), "emp", metadata).unwrap());
        let plan = MergeJoinPlan::new(Arc::clone(&tx), emp, dept, "edept", "did");
        assert_eq!(plan.schema().fields(), ["ename", "edept", "did", "dname"]);

        let mut scan = plan.open().unwrap();
        let mut rows = vec![];
        while scan.next().unwrap() {
            assert_eq!(scan.get_int("edept").unwrap(), scan.get_int("did").unwrap());
            rows.push((
                scan.get_string("ename").unwrap(),
                scan.get_string("dname").unwrap(),
            ));
        }
        scan.close();
        rows.sort();
        let expected: Vec<(String, String)> = [
            ("amy", "sales"),
            ("bob", "eng"),
            ("cal", "sales"),
            ("dee", "ops"),
            ("eve", "eng"),
            ("gus", "sales"),
        ]
        .iter()
        .map(|(e, d)| (e.to_string(), d.to_string()))
        .collect();
        assert_eq!(rows, expected);
        tx.commit().unwrap();
    }
}
