use crate::{
    error::DbResult,
    index::Index,
    query::{Constant, Scan, UpdateScan},
    record::TableScan,
};

/// The records of a table whose indexed field equals a constant
pub struct IndexSelectScan {
    table_scan: TableScan,
    index: Box<dyn Index>,
    value: Constant,
}

impl IndexSelectScan {
    pub fn new(table_scan: TableScan, index: Box<dyn Index>, value: Constant) -> DbResult<Self> {
        let mut scan = Self {
            table_scan,
            index,
            value,
        };
        scan.before_first()?;
        Ok(scan)
    }
}

impl Scan for IndexSelectScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.index.before_first(&self.value)
    }

    fn next(&mut self) -> DbResult<bool> {
        if !self.index.next()? {
            return Ok(false);
        }
        let rid = self.index.get_data_rid()?;
        self.table_scan.move_to_rid(rid)?;
        Ok(true)
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        self.table_scan.get_int(field_name)
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        self.table_scan.get_string(field_name)
    }

    fn get_value(&self, field_name: &str) -> DbResult<Constant> {
        self.table_scan.get_value(field_name)
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.table_scan.has_field(field_name)
    }

    fn close(&mut self) {
        self.index.close();
        self.table_scan.close();
    }
}

/// For each left row, the rows of the right table whose indexed field equals the left
/// row's join field
pub struct IndexJoinScan {
    left: Box<dyn Scan>,
    index: Box<dyn Index>,
    join_field: String,
    right: TableScan,
    has_left: bool,
}

impl IndexJoinScan {
    pub fn new(
        left: Box<dyn Scan>,
        index: Box<dyn Index>,
        join_field: &str,
        right: TableScan,
    ) -> DbResult<Self> {
        let mut scan = Self {
            left,
            index,
            join_field: join_field.to_string(),
            right,
            has_left: false,
        };
        scan.before_first()?;
        Ok(scan)
    }

    fn reset_index(&mut self) -> DbResult<()> {
        let search_key = self.left.get_value(&self.join_field)?;
        self.index.before_first(&search_key)
    }
}

impl Scan for IndexJoinScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.left.before_first()?;
        self.has_left = self.left.next()?;
        if self.has_left {
            self.reset_index()?;
        }
        Ok(())
    }

    fn next(&mut self) -> DbResult<bool> {
        while self.has_left {
            if self.index.next()? {
                let rid = self.index.get_data_rid()?;
                self.right.move_to_rid(rid)?;
                return Ok(true);
            }
            self.has_left = self.left.next()?;
            if self.has_left {
                self.reset_index()?;
            }
        }
        Ok(false)
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        if self.right.has_field(field_name) {
            self.right.get_int(field_name)
        } else {
            self.left.get_int(field_name)
        }
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        if self.right.has_field(field_name) {
            self.right.get_string(field_name)
        } else {
            self.left.get_string(field_name)
        }
    }

    fn get_value(&self, field_name: &str) -> DbResult<Constant> {
        if self.right.has_field(field_name) {
            self.right.get_value(field_name)
        } else {
            self.left.get_value(field_name)
        }
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.right.has_field(field_name) || self.left.has_field(field_name)
    }

    fn close(&mut self) {
        self.left.close();
        self.index.close();
        self.right.close();
    }
}

#[cfg(test)]
mod index_scan_tests {
    use std::sync::Arc;

    use crate::{
        index::{entry_layout, BTreeIndex, HashIndex, Index, IndexJoinScan, IndexSelectScan},
        query::{Constant, Scan, UpdateScan},
        record::{FieldType, Layout, Schema, TableScan},
        test_utils::{generate_filename, TestStorage},
        transaction::Transaction,
    };

    /// A table of (id, owner) rows plus an index on `owner`
    fn indexed_table(
        tx: &Arc<Transaction>,
        rows: &[(i32, i32)],
        mut index: Box<dyn Index>,
    ) -> (String, Layout, Box<dyn Index>) {
        let mut schema = Schema::new();
        schema.add_int_field("id");
        schema.add_int_field("owner");
        let layout = Layout::new(schema);
        let table = generate_filename();
        let mut scan = TableScan::new(Arc::clone(tx), &table, layout.clone()).unwrap();
        for (id, owner) in rows {
            scan.insert().unwrap();
            scan.set_int("id", *id).unwrap();
            scan.set_int("owner", *owner).unwrap();
            index
                .insert(&Constant::Int(*owner), scan.get_rid().unwrap())
                .unwrap();
        }
        scan.close();
        (table, layout, index)
    }

    #[test]
    fn test_index_select_scan() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let index = Box::new(HashIndex::new(
            Arc::clone(&tx),
            &generate_filename(),
            entry_layout(FieldType::Integer, 0),
        ));
        let (table, layout, index) =
            indexed_table(&tx, &[(1, 10), (2, 20), (3, 10), (4, 30)], index);

        let table_scan = TableScan::new(Arc::clone(&tx), &table, layout).unwrap();
        let mut scan = IndexSelectScan::new(table_scan, index, Constant::Int(10)).unwrap();
        let mut ids = vec![];
        while scan.next().unwrap() {
            ids.push(scan.get_int("id").unwrap());
        }
        ids.sort();
        assert_eq!(ids, vec![1, 3]);
        scan.close();
        tx.commit().unwrap();
    }

    #[test]
    fn test_index_join_scan() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();

        let mut user_schema = Schema::new();
        user_schema.add_int_field("uid");
        let user_layout = Layout::new(user_schema);
        let users = generate_filename();
        let mut scan = TableScan::new(Arc::clone(&tx), &users, user_layout.clone()).unwrap();
        for uid in [10, 20, 40] {
            scan.insert().unwrap();
            scan.set_int("uid", uid).unwrap();
        }
        scan.close();

        let index = Box::new(
            BTreeIndex::new(
                Arc::clone(&tx),
                &generate_filename(),
                entry_layout(FieldType::Integer, 0),
            )
            .unwrap(),
        );
        let (orders, order_layout, index) =
            indexed_table(&tx, &[(1, 10), (2, 20), (3, 10), (4, 30)], index);

        let left = Box::new(TableScan::new(Arc::clone(&tx), &users, user_layout).unwrap());
        let right = TableScan::new(Arc::clone(&tx), &orders, order_layout).unwrap();
        let mut join = IndexJoinScan::new(left, index, "uid", right).unwrap();
        let mut pairs = vec![];
        while join.next().unwrap() {
            pairs.push((join.get_int("uid").unwrap(), join.get_int("id").unwrap()));
        }
        pairs.sort();
        assert_eq!(pairs, vec![(10, 1), (10, 3), (20, 2)]);
        join.close();
        assert_eq!(storage.buffer_manager.available(), 8);
        tx.commit().unwrap();
    }
}
