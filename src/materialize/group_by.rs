use std::{collections::HashMap, sync::Arc};

use crate::{
    error::{DbError, DbResult},
    materialize::{AggregationFn, SortPlan},
    plan::Plan,
    query::{Constant, Scan},
    record::Schema,
    transaction::Transaction,
};

/// Groups its sorted input on `group_fields` and computes aggregates per group
pub struct GroupByPlan {
    plan: Arc<dyn Plan>,
    group_fields: Vec<String>,
    agg_fns: Vec<AggregationFn>,
    schema: Schema,
}

impl GroupByPlan {
    pub fn new(
        tx: Arc<Transaction>,
        plan: Arc<dyn Plan>,
        group_fields: Vec<String>,
        agg_fns: Vec<AggregationFn>,
    ) -> DbResult<Self> {
        let mut schema = Schema::new();
        for field in &group_fields {
            schema.add(field, plan.schema())?;
        }
        for agg_fn in &agg_fns {
            agg_fn.add_output_field(&mut schema, plan.schema())?;
        }
        let sorted = Arc::new(SortPlan::new(tx, plan, group_fields.clone()));
        Ok(Self {
            plan: sorted,
            group_fields,
            agg_fns,
            schema,
        })
    }
}

impl Plan for GroupByPlan {
    fn open(&self) -> DbResult<Box<dyn Scan>> {
        let scan = self.plan.open()?;
        Ok(Box::new(GroupByScan::new(
            scan,
            self.group_fields.clone(),
            self.agg_fns.clone(),
        )?))
    }

    fn blocks_accessed(&self) -> usize {
        self.plan.blocks_accessed()
    }

    fn records_output(&self) -> usize {
        self.group_fields
            .iter()
            .map(|field| self.plan.distinct_values(field))
            .product()
    }

    fn distinct_values(&self, field_name: &str) -> usize {
        if self.plan.schema().has_field(field_name) {
            self.plan.distinct_values(field_name)
        } else {
            self.records_output()
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// The group field values of one group
#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupValue {
    values: HashMap<String, Constant>,
}

impl GroupValue {
    fn new(scan: &dyn Scan, fields: &[String]) -> DbResult<Self> {
        let values = fields
            .iter()
            .map(|field| Ok((field.clone(), scan.get_value(field)?)))
            .collect::<DbResult<_>>()?;
        Ok(Self { values })
    }
}

/// One row per group of a scan sorted on the group fields
pub struct GroupByScan {
    scan: Box<dyn Scan>,
    group_fields: Vec<String>,
    agg_fns: Vec<AggregationFn>,
    group_value: Option<GroupValue>,
    more_groups: bool,
}

impl GroupByScan {
    pub fn new(
        scan: Box<dyn Scan>,
        group_fields: Vec<String>,
        agg_fns: Vec<AggregationFn>,
    ) -> DbResult<Self> {
        let mut scan = Self {
            scan,
            group_fields,
            agg_fns,
            group_value: None,
            more_groups: false,
        };
        scan.before_first()?;
        Ok(scan)
    }
}

impl Scan for GroupByScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.group_value = None;
        self.scan.before_first()?;
        self.more_groups = self.scan.next()?;
        Ok(())
    }

    /// Consume every input row of the next group, leaving the input on the first row
    /// of the group after it
    fn next(&mut self) -> DbResult<bool> {
        if !self.more_groups {
            self.group_value = None;
            return Ok(false);
        }
        for agg_fn in self.agg_fns.iter_mut() {
            agg_fn.process_first(self.scan.as_ref())?;
        }
        let group_value = GroupValue::new(self.scan.as_ref(), &self.group_fields)?;
        loop {
            self.more_groups = self.scan.next()?;
            if !self.more_groups {
                break;
            }
            if GroupValue::new(self.scan.as_ref(), &self.group_fields)? != group_value {
                break;
            }
            for agg_fn in self.agg_fns.iter_mut() {
                agg_fn.process_next(self.scan.as_ref())?;
            }
        }
        self.group_value = Some(group_value);
        Ok(true)
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        self.get_value(field_name)?.as_int()
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        Ok(self.get_value(field_name)?.as_str()?.to_string())
    }

    fn get_value(&self, field_name: &str) -> DbResult<Constant> {
        let group_value = self.group_value.as_ref().ok_or(DbError::NoCurrentRecord)?;
        if let Some(value) = group_value.values.get(field_name) {
            return Ok(value.clone());
        }
        self.agg_fns
            .iter()
            .find(|agg_fn| agg_fn.field_name() == field_name)
            .ok_or_else(|| DbError::FieldNotFound(field_name.to_string()))?
            .value()
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.group_fields.iter().any(|field| field == field_name)
            || self
                .agg_fns
                .iter()
                .any(|agg_fn| agg_fn.field_name() == field_name)
    }

    fn close(&mut self) {
        self.scan.close();
    }
}

#[cfg(test)]
mod group_by_tests {
    use std::sync::Arc;

    use crate::{
        error::DbError,
        materialize::{AggregationFn, GroupByPlan},
        plan::{Plan, TablePlan},
        KeiPyDB,
    };

    #[test]
    fn test_group_by_with_aggregates() {
        let (db, _dir) = KeiPyDB::new_for_test(400, 8);
        let tx = db.new_tx().unwrap();
        let planner = db.planner();
        planner
            .execute_update("create table sales (region varchar(5), amount int)", &tx)
            .unwrap();
        let rows = [
            ("west", 10),
            ("east", 4),
            ("west", 3),
            ("north", 8),
            ("east", 6),
            ("west", 7),
        ];
        for (region, amount) in rows {
            planner
                .execute_update(
                    &format!("insert into sales (region, amount) values ('{region}', {amount})"),
                    &tx,
                )
                .unwrap();
        }

        let table =
            Arc::new(TablePlan::new(Arc::clone(&tx), "sales", db.metadata_manager()).unwrap());
        let plan = GroupByPlan::new(
            Arc::clone(&tx),
            table,
            vec!["region".to_string()],
            vec![
                AggregationFn::count("amount"),
                AggregationFn::sum("amount"),
                AggregationFn::max("amount"),
                AggregationFn::min("amount"),
            ],
        )
        .unwrap();
        assert_eq!(
            plan.schema().fields(),
            ["region", "countofamount", "sumofamount", "maxofamount", "minofamount"]
        );

        let mut scan = plan.open().unwrap();
        let mut groups = vec![];
        while scan.next().unwrap() {
            groups.push((
                scan.get_string("region").unwrap(),
                scan.get_int("countofamount").unwrap(),
                scan.get_int("sumofamount").unwrap(),
                scan.get_int("maxofamount").unwrap(),
                scan.get_int("minofamount").unwrap(),
            ));
        }
        assert_eq!(
            groups,
            vec![
                ("east".to_string(), 2, 10, 6, 4),
                ("north".to_string(), 1, 8, 8, 8),
                ("west".to_string(), 3, 20, 10, 3),
            ]
        );
        assert!(matches!(
            scan.get_value("amount"),
            Err(DbError::NoCurrentRecord)
        ));
        scan.before_first().unwrap();
        assert!(scan.next().unwrap());
        assert!(matches!(
            scan.get_value("amount"),
            Err(DbError::FieldNotFound(_))
        ));
        scan.close();
        tx.commit().unwrap();
    }

    #[test]
    fn test_group_by_empty_input() {
        let (db, _dir) = KeiPyDB::new_for_test(400, 8);
        let tx = db.new_tx().unwrap();
        db.planner()
            .execute_update("create table g (k int)", &tx)
            .unwrap();
        let table = Arc::new(TablePlan::new(Arc::clone(&tx), "g", db.metadata_manager()).unwrap());
        let plan = GroupByPlan::new(
            Arc::clone(&tx),
            table,
            vec!["k".to_string()],
            vec![AggregationFn::count("k")],
        )
        .unwrap();
        let mut scan = plan.open().unwrap();
        assert!(!scan.next().unwrap());
        scan.close();
        tx.commit().unwrap();
    }
}
