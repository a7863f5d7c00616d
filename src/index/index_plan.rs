use std::sync::Arc;

use crate::{
    error::DbResult,
    index::{IndexJoinScan, IndexSelectScan},
    metadata::IndexInfo,
    plan::{Plan, TablePlan},
    query::{Constant, Scan},
    record::Schema,
};

/// Finds the rows of a stored table whose indexed field equals a constant
pub struct IndexSelectPlan {
    table_plan: Arc<TablePlan>,
    index_info: IndexInfo,
    value: Constant,
}

impl IndexSelectPlan {
    pub fn new(table_plan: Arc<TablePlan>, index_info: IndexInfo, value: Constant) -> Self {
        Self {
            table_plan,
            index_info,
            value,
        }
    }
}

impl Plan for IndexSelectPlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        let table_scan = self.table_plan.open_table_scan()?;
        let index = self.index_info.open()?;
        Ok(Box::new(IndexSelectScan::new(
            table_scan,
            index,
            self.value.clone(),
        )?))
    }

    /// Index traversal plus one block per matching record
    fn blocks_accessed(&self) -> usize {
        self.index_info
            .blocks_accessed()
            .saturating_add(self.records_output())
    }

    fn records_output(&self) -> usize {
        self.index_info.records_output()
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        self.index_info.distinct_values(field_name)
    }

    fn schema(&self) -> &Schema {
        self.table_plan.schema()
    }
}

/// Joins any plan with a stored table through an index on the table's join field
pub struct IndexJoinPlan {
    left: Arc<dyn Plan>,
    right: Arc<TablePlan>,
    index_info: IndexInfo,
    join_field: String,
    schema: Schema,
}

impl IndexJoinPlan {
    pub fn new(
        left: Arc<dyn Plan>,
        right: Arc<TablePlan>,
        index_info: IndexInfo,
        join_field: &str,
    ) -> Self {
        let mut schema = left.schema().clone();
        schema.add_all(right.schema());
        Self {
            left,
            right,
            index_info,
            join_field: join_field.to_string(),
            schema,
        }
    }
}

impl Plan for IndexJoinPlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        let left = self.left.open()?;
        let right = self.right.open_table_scan()?;
        let index = self.index_info.open()?;
        Ok(Box::new(IndexJoinScan::new(
            left,
            index,
            &self.join_field,
            right,
        )?))
    }

    fn blocks_accessed(&self) -> usize {
        self.left
            .blocks_accessed()
            .saturating_add(
                self.left
                    .records_output()
                    .saturating_mul(self.index_info.blocks_accessed()),
            )
            .saturating_add(self.records_output())
    }

    fn records_output(&self) -> usize {
        self.left
            .records_output()
            .saturating_mul(self.index_info.records_output())
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

#[cfg(test)]
mod index_plan_tests {
    use std::sync::Arc;

    use crate::{
        index::{IndexJoinPlan, IndexSelectPlan},
        plan::{Plan, TablePlan},
        query::Constant,
        KeiPyDB,
    };

    fn run(db: &KeiPyDB, statements: &[&str]) {
        let tx = db.new_tx().unwrap();
        for sql in statements {
            db.planner().execute_update(sql, &tx).unwrap();
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_index_plans() {
        let (db, _dir) = KeiPyDB::new_for_test(400, 8);
        run(
            &db,
            &[
                "create table dept (did int, dname varchar(10))",
                "create table emp (eid int, edept int)",
                "create index edept_idx on emp (edept)",
                "insert into dept (did, dname) values (1, 'math')",
                "insert into dept (did, dname) values (2, 'art')",
                "insert into emp (eid, edept) values (100, 1)",
                "insert into emp (eid, edept) values (101, 2)",
                "insert into emp (eid, edept) values (102, 1)",
            ],
        );

        let tx = db.new_tx().unwrap();
        let metadata = db.metadata_manager();
        let index_info = metadata
            .get_index_info("emp", &tx)
            .unwrap()
            .remove("edept")
            .unwrap();

        let emp = Arc::new(TablePlan::new(Arc::clone(&tx), "emp", metadata).unwrap());
        let select = IndexSelectPlan::new(Arc::clone(&emp), index_info.clone(), Constant::Int(1));
        assert_eq!(select.distinct_values("edept"), 1);
        let mut scan = select.open().unwrap();
        let mut eids = vec![];
        while scan.next().unwrap() {
            eids.push(scan.get_int("eid").unwrap());
        }
        scan.close();
        eids.sort();
        assert_eq!(eids, vec![100, 102]);

        //  each dept row looks up the emp rows whose edept equals its did
        let dept = Arc::new(TablePlan::new(Arc::clone(&tx), "dept", metadata).unwrap());
        let join = IndexJoinPlan::new(dept, emp, index_info, "did");
        assert!(join.schema().has_field("dname") && join.schema().has_field("eid"));
        let mut scan = join.open().unwrap();
        let mut rows = vec![];
        while scan.next().unwrap() {
            rows.push((scan.get_string("dname").unwrap(), scan.get_int("eid").unwrap()));
        }
        scan.close();
        rows.sort();
        assert_eq!(
            rows,
            vec![
                ("art".to_string(), 101),
                ("math".to_string(), 100),
                ("math".to_string(), 102)
            ]
        );
        tx.commit().unwrap();
    }
}
