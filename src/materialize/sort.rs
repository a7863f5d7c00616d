use std::{cmp::Ordering, sync::Arc};

use log::debug;

use crate::{
    error::{DbError, DbResult},
    materialize::{copy_record, MaterializePlan, TempTable},
    plan::Plan,
    query::{Constant, Scan, UpdateScan},
    record::{Rid, Schema, TableScan},
    transaction::Transaction,
};

/// Orders rows by a list of fields, the first field most significant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordComparator {
    fields: Vec<String>,
}

impl RecordComparator {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn compare(&self, s1: &dyn Scan, s2: &dyn Scan) -> DbResult<Ordering> {
        for field in &self.fields {
            let ordering = s1.get_value(field)?.cmp(&s2.get_value(field)?);
            if ordering != Ordering::Equal {
                return Ok(ordering);
            }
        }
        Ok(Ordering::Equal)
    }
}

/// Sorts its child with a merge sort over temp tables
///
/// `open` splits the input into sorted runs and merges them pairwise until at most two
/// remain; the scan merges the last two on the fly.
pub struct SortPlan {
    tx: Arc<Transaction>,
    plan: Arc<dyn Plan>,
    comparator: RecordComparator,
}

impl SortPlan {
    pub fn new(tx: Arc<Transaction>, plan: Arc<dyn Plan>, sort_fields: Vec<String>) -> Self {
        Self {
            tx,
            plan,
            comparator: RecordComparator::new(sort_fields),
        }
    }

    /// Like `open`, but keeps the concrete scan so callers can save and restore positions
    pub fn open_sort_scan(&self) -> DbResult<SortScan> {
        let mut src = self.plan.open()?;
        let mut runs = self.split_into_runs(src.as_mut())?;
        src.close();
        debug!("sorting {} initial runs", runs.len());
        while runs.len() > 2 {
            runs = self.do_a_merge_iteration(runs)?;
        }
        if runs.is_empty() {
            runs.push(TempTable::new(
                Arc::clone(&self.tx),
                self.plan.schema().clone(),
            ));
        }
        SortScan::new(&runs, self.comparator.clone())
    }

    fn split_into_runs(&self, src: &mut dyn Scan) -> DbResult<Vec<TempTable>> {
        let mut runs = vec![];
        src.before_first()?;
        if !src.next()? {
            return Ok(runs);
        }
        let schema = self.plan.schema();
        let mut current_run = TempTable::new(Arc::clone(&self.tx), schema.clone());
        let mut current_scan = current_run.open()?;
        runs.push(current_run);
        loop {
            copy_record(src, &mut current_scan, schema)?;
            if !src.next()? {
                break;
            }
            if self.comparator.compare(src, &current_scan)? == Ordering::Less {
                //  the next row is out of order: start a new run
                current_scan.close();
                current_run = TempTable::new(Arc::clone(&self.tx), schema.clone());
                current_scan = current_run.open()?;
                runs.push(current_run);
            }
        }
        current_scan.close();
        Ok(runs)
    }

    fn do_a_merge_iteration(&self, runs: Vec<TempTable>) -> DbResult<Vec<TempTable>> {
        let mut result = Vec::with_capacity(runs.len().div_ceil(2));
        let mut runs = runs.into_iter();
        while let Some(first) = runs.next() {
            match runs.next() {
                Some(second) => result.push(self.merge_two_runs(&first, &second)?),
                None => result.push(first),
            }
        }
        Ok(result)
    }

    fn merge_two_runs(&self, first: &TempTable, second: &TempTable) -> DbResult<TempTable> {
        let schema = self.plan.schema();
        let mut src1 = first.open()?;
        let mut src2 = second.open()?;
        let result = TempTable::new(Arc::clone(&self.tx), schema.clone());
        let mut dest = result.open()?;

        let mut has_more1 = src1.next()?;
        let mut has_more2 = src2.next()?;
        while has_more1 && has_more2 {
            if self.comparator.compare(&src1, &src2)? == Ordering::Less {
                copy_record(&src1, &mut dest, schema)?;
                has_more1 = src1.next()?;
            } else {
                copy_record(&src2, &mut dest, schema)?;
                has_more2 = src2.next()?;
            }
        }
        while has_more1 {
            copy_record(&src1, &mut dest, schema)?;
            has_more1 = src1.next()?;
        }
        while has_more2 {
            copy_record(&src2, &mut dest, schema)?;
            has_more2 = src2.next()?;
        }
        src1.close();
        src2.close();
        dest.close();
        Ok(result)
    }
}

impl Plan for SortPlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        Ok(Box::new(self.open_sort_scan()?))
    }

    /// The cost of reading the sorted output; building the runs is not counted
    fn blocks_accessed(&self) -> usize {
        MaterializePlan::new(Arc::clone(&self.tx), Arc::clone(&self.plan)).blocks_accessed()
    }

    fn records_output(&self) -> usize {
        self.plan.records_output()
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        self.plan.distinct_values(field_name)
    }

    fn schema(&self) -> &Schema {
        self.plan.schema()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    First,
    Second,
}

/// A position in a `SortScan`, for stepping back over a group of equal keys
#[derive(Debug, Clone, Copy)]
struct SavedPosition {
    first: Option<Rid>,
    second: Option<Rid>,
    current: Option<Run>,
}

/// Merges one or two sorted runs into a single sorted stream
pub struct SortScan {
    s1: TableScan,
    s2: Option<TableScan>,
    comparator: RecordComparator,
    current: Option<Run>,
    has_more1: bool,
    has_more2: bool,
    saved_position: Option<SavedPosition>,
}

impl SortScan {
    fn new(runs: &[TempTable], comparator: RecordComparator) -> DbResult<Self> {
        let Some(first) = runs.first() else {
            return Err(DbError::NoCurrentRecord);
        };
        let s1 = first.open()?;
        let s2 = runs.get(1).map(TempTable::open).transpose()?;
        let mut scan = Self {
            s1,
            s2,
            comparator,
            current: None,
            has_more1: false,
            has_more2: false,
            saved_position: None,
        };
        scan.before_first()?;
        Ok(scan)
    }

    fn current_scan(&self) -> DbResult<&TableScan> {
        match self.current {
            Some(Run::First) => Ok(&self.s1),
            Some(Run::Second) => self.s2.as_ref().ok_or(DbError::NoCurrentRecord),
            None => Err(DbError::NoCurrentRecord),
        }
    }

    /// Remember the current row and the state of both runs
    pub fn save_position(&mut self) -> DbResult<()> {
        let first = if self.has_more1 {
            Some(self.s1.get_rid()?)
        } else {
            None
        };
        let second = match self.s2.as_mut() {
            Some(s2) if self.has_more2 => Some(s2.get_rid()?),
            _ => None,
        };
        self.saved_position = Some(SavedPosition {
            first,
            second,
            current: self.current,
        });
        Ok(())
    }

    /// Return to the row recorded by the last `save_position`
    pub fn restore_position(&mut self) -> DbResult<()> {
        let saved = self.saved_position.ok_or(DbError::NoCurrentRecord)?;
        self.has_more1 = saved.first.is_some();
        if let Some(rid) = saved.first {
            self.s1.move_to_rid(rid)?;
        }
        self.has_more2 = saved.second.is_some();
        if let (Some(rid), Some(s2)) = (saved.second, self.s2.as_mut()) {
            s2.move_to_rid(rid)?;
        }
        self.current = saved.current;
        Ok(())
    }
}

impl Scan for SortScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.current = None;
        self.s1.before_first()?;
        self.has_more1 = self.s1.next()?;
        if let Some(s2) = self.s2.as_mut() {
            s2.before_first()?;
            self.has_more2 = s2.next()?;
        }
        Ok(())
    }

    fn next(&mut self) -> DbResult<bool> {
        match (self.current, self.s2.as_mut()) {
            (Some(Run::First), _) => self.has_more1 = self.s1.next()?,
            (Some(Run::Second), Some(s2)) => self.has_more2 = s2.next()?,
            _ => {}
        }
        self.current = match (self.has_more1, self.has_more2, self.s2.as_ref()) {
            (false, false, _) => None,
            (true, true, Some(s2)) => {
                if self.comparator.compare(&self.s1, s2)? == Ordering::Less {
                    Some(Run::First)
                } else {
                    Some(Run::Second)
                }
            }
            (true, _, _) => Some(Run::First),
            (false, true, _) => Some(Run::Second),
        };
        Ok(self.current.is_some())
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        self.current_scan()?.get_int(field_name)
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        self.current_scan()?.get_string(field_name)
    }

    fn get_value(&self, field_name: &str) -> DbResult<Constant> {
        self.current_scan()?.get_value(field_name)
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.s1.has_field(field_name)
    }

    fn close(&mut self) {
        self.s1.close();
        if let Some(s2) = self.s2.as_mut() {
            s2.close();
        }
    }
}

#[cfg(test)]
mod sort_tests {
    use std::sync::Arc;

    use crate::{
        materialize::SortPlan,
        plan::{Plan, TablePlan},
        query::Scan,
        KeiPyDB,
    };

    fn collect(scan: &mut dyn Scan) -> Vec<(String, i32)> {
        let mut rows = vec![];
        while scan.next().unwrap() {
            rows.push((scan.get_string("k").unwrap(), scan.get_int("n").unwrap()));
        }
        rows
    }

    #[test]
    fn test_sort_on_two_fields() {
        let (db, _dir) = KeiPyDB::new_for_test(400, 8);
        let tx = db.new_tx().unwrap();
        let planner = db.planner();
        planner
            .execute_update("create table s (k varchar(4), n int)", &tx)
            .unwrap();
        let mut expected = vec![];
        for i in 0..60 {
            let key = ["b", "a", "c"][i % 3];
            let n = (i as i32 * 7) % 11;
            planner
                .execute_update(&format!("insert into s (k, n) values ('{key}', {n})"), &tx)
                .unwrap();
            expected.push((key.to_string(), n));
        }
        expected.sort();

        let table = Arc::new(TablePlan::new(Arc::clone(&tx), "s", db.metadata_manager()).unwrap());
        let plan = SortPlan::new(
            Arc::clone(&tx),
            table,
            vec!["k".to_string(), "n".to_string()],
        );
        let mut scan = plan.open().unwrap();
        assert_eq!(collect(scan.as_mut()), expected);

        //  a sort scan can be read twice
        scan.before_first().unwrap();
        assert_eq!(collect(scan.as_mut()).len(), 60);
        scan.close();
        tx.commit().unwrap();
    }

    #[test]
    fn test_sort_empty_input_and_restore_position() {
        let (db, _dir) = KeiPyDB::new_for_test(400, 8);
        let tx = db.new_tx().unwrap();
        let planner = db.planner();
        planner
            .execute_update("create table s (k varchar(4), n int)", &tx)
            .unwrap();
        let table = Arc::new(TablePlan::new(Arc::clone(&tx), "s", db.metadata_manager()).unwrap());
        let plan = SortPlan::new(Arc::clone(&tx), table, vec!["n".to_string()]);
        let mut scan = plan.open().unwrap();
        assert!(!scan.next().unwrap());
        scan.close();

        for (k, n) in [("x", 3), ("y", 1), ("z", 2), ("w", 0)] {
            planner
                .execute_update(&format!("insert into s (k, n) values ('{k}', {n})"), &tx)
                .unwrap();
        }
        let table = Arc::new(TablePlan::new(Arc::clone(&tx), "s", db.metadata_manager()).unwrap());
        let plan = SortPlan::new(Arc::clone(&tx), table, vec!["n".to_string()]);
        let mut scan = plan.open_sort_scan().unwrap();
        assert!(scan.next().unwrap());
        assert!(scan.next().unwrap());
        assert_eq!(scan.get_int("n").unwrap(), 1);
        scan.save_position().unwrap();
        assert!(scan.next().unwrap());
        assert!(scan.next().unwrap());
        assert_eq!(scan.get_int("n").unwrap(), 3);
        assert!(!scan.next().unwrap());
        scan.restore_position().unwrap();
        assert_eq!(scan.get_string("k").unwrap(), "y");
        assert!(scan.next().unwrap());
        assert_eq!(scan.get_int("n").unwrap(), 2);
        scan.close();
        tx.commit().unwrap();
    }
}
