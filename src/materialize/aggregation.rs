use std::fmt::Display;

use crate::{
    error::{DbError, DbResult},
    query::{Constant, Scan},
    record::{FieldType, Schema},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Max,
    Min,
    Sum,
}

impl Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateKind::Count => "count",
            AggregateKind::Max => "max",
            AggregateKind::Min => "min",
            AggregateKind::Sum => "sum",
        };
        write!(f, "{name}")
    }
}

/// An aggregate over one field of every row in a group
///
/// The output field is named `<kind>of<field>`, e.g. `maxofgradyear`.
#[derive(Debug, Clone)]
pub struct AggregationFn {
    kind: AggregateKind,
    field_name: String,
    output_name: String,
    current: Option<Constant>,
}

impl AggregationFn {
    pub fn new(kind: AggregateKind, field_name: &str) -> Self {
        Self {
            kind,
            field_name: field_name.to_string(),
            output_name: format!("{kind}of{field_name}"),
            current: None,
        }
    }

    pub fn count(field_name: &str) -> Self {
        Self::new(AggregateKind::Count, field_name)
    }

    pub fn max(field_name: &str) -> Self {
        Self::new(AggregateKind::Max, field_name)
    }

    pub fn min(field_name: &str) -> Self {
        Self::new(AggregateKind::Min, field_name)
    }

    pub fn sum(field_name: &str) -> Self {
        Self::new(AggregateKind::Sum, field_name)
    }

    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    /// The field the aggregate reads
    pub fn source_field(&self) -> &str {
        &self.field_name
    }

    /// The field the aggregate produces
    pub fn field_name(&self) -> &str {
        &self.output_name
    }

    /// Add the output field to `schema`, typed from the source field in `source`
    pub fn add_output_field(&self, schema: &mut Schema, source: &Schema) -> DbResult<()> {
        match self.kind {
            AggregateKind::Count | AggregateKind::Sum => schema.add_int_field(&self.output_name),
            AggregateKind::Max | AggregateKind::Min => {
                let info = source.info(&self.field_name)?;
                match info.field_type {
                    FieldType::Integer => schema.add_int_field(&self.output_name),
                    FieldType::Varchar => schema.add_string_field(&self.output_name, info.length),
                }
            }
        }
        Ok(())
    }

    /// Start a new group at the current row of `scan`
    pub fn process_first(&mut self, scan: &dyn Scan) -> DbResult<()> {
        self.current = Some(match self.kind {
            AggregateKind::Count => Constant::Int(1),
            AggregateKind::Sum => Constant::Int(scan.get_int(&self.field_name)?),
            AggregateKind::Max | AggregateKind::Min => scan.get_value(&self.field_name)?,
        });
        Ok(())
    }

    /// Fold the current row of `scan` into the running value
    pub fn process_next(&mut self, scan: &dyn Scan) -> DbResult<()> {
        let Some(current) = self.current.take() else {
            return self.process_first(scan);
        };
        let next = match self.kind {
            AggregateKind::Count => Constant::Int(current.as_int()? + 1),
            AggregateKind::Sum => {
                Constant::Int(current.as_int()? + scan.get_int(&self.field_name)?)
            }
            AggregateKind::Max => current.max(scan.get_value(&self.field_name)?),
            AggregateKind::Min => current.min(scan.get_value(&self.field_name)?),
        };
        self.current = Some(next);
        Ok(())
    }

    pub fn value(&self) -> DbResult<Constant> {
        self.current.clone().ok_or(DbError::NoCurrentRecord)
    }
}

#[cfg(test)]
mod aggregation_tests {
    use std::sync::Arc;

    use crate::{
        materialize::{AggregateKind, AggregationFn},
        query::{Constant, Scan, UpdateScan},
        record::{FieldType, Layout, Schema, TableScan},
        test_utils::TestStorage,
    };

    #[test]
    fn test_aggregates_fold_rows() {
        let storage = TestStorage::new(400, 8);
        let tx = storage.new_tx();
        let mut schema = Schema::new();
        schema.add_int_field("n");
        schema.add_string_field("s", 5);
        let layout = Layout::new(schema.clone());
        let mut scan = TableScan::new(Arc::clone(&tx), "agg", layout).unwrap();
        for (n, s) in [(4, "dd"), (9, "aa"), (-2, "zz")] {
            scan.insert().unwrap();
            scan.set_int("n", n).unwrap();
            scan.set_string("s", s).unwrap();
        }

        let mut fns = vec![
            AggregationFn::count("n"),
            AggregationFn::sum("n"),
            AggregationFn::max("n"),
            AggregationFn::min("s"),
        ];
        scan.before_first().unwrap();
        assert!(scan.next().unwrap());
        for f in fns.iter_mut() {
            f.process_first(&scan).unwrap();
        }
        while scan.next().unwrap() {
            for f in fns.iter_mut() {
                f.process_next(&scan).unwrap();
            }
        }
        scan.close();

        let values: Vec<Constant> = fns.iter().map(|f| f.value().unwrap()).collect();
        assert_eq!(
            values,
            vec![
                Constant::Int(3),
                Constant::Int(11),
                Constant::Int(9),
                Constant::from("aa")
            ]
        );
        assert_eq!(fns[0].field_name(), "countofn");
        assert_eq!(fns[3].field_name(), "minofs");
        assert_eq!(fns[3].kind(), AggregateKind::Min);

        let mut output = Schema::new();
        for f in &fns {
            f.add_output_field(&mut output, &schema).unwrap();
        }
        assert_eq!(output.field_type("maxofn").unwrap(), FieldType::Integer);
        assert_eq!(output.field_type("minofs").unwrap(), FieldType::Varchar);
        assert_eq!(output.length("minofs").unwrap(), 5);
        tx.commit().unwrap();
    }

    #[test]
    fn test_value_before_any_row() {
        assert!(AggregationFn::max("x").value().is_err());
    }
}
