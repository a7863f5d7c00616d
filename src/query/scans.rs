use crate::{
    error::{DbError, DbResult},
    query::{Constant, Predicate, Scan, UpdateScan},
    record::Rid,
};

/// Yields the rows of its child that satisfy a predicate
///
/// Writes pass straight through to the child when the child is writable.
pub struct SelectScan {
    scan: Box<dyn Scan>,
    predicate: Predicate,
}

impl SelectScan {
    pub fn new(scan: Box<dyn Scan>, predicate: Predicate) -> Self {
        Self { scan, predicate }
    }

    fn child(&mut self) -> DbResult<&mut dyn UpdateScan> {
        self.scan.as_update().ok_or(DbError::NotUpdatable)
    }
}

impl Scan for SelectScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.scan.before_first()
    }

    fn next(&mut self) -> DbResult<bool> {
        while self.scan.next()? {
            if self.predicate.is_satisfied(self.scan.as_ref())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        self.scan.get_int(field_name)
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        self.scan.get_string(field_name)
    }

    fn get_value(&self, field_name: &str) -> DbResult<Constant> {
        self.scan.get_value(field_name)
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.scan.has_field(field_name)
    }

    fn close(&mut self) {
        self.scan.close();
    }

    fn as_update(&mut self) -> Option<&mut dyn UpdateScan> {
        if self.scan.as_update().is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl UpdateScan for SelectScan {
    fn set_int(&mut self, field_name: &str, value: i32) -> DbResult<()> {
        self.child()?.set_int(field_name, value)
    }

    fn set_string(&mut self, field_name: &str, value: &str) -> DbResult<()> {
        self.child()?.set_string(field_name, value)
    }

    fn set_value(&mut self, field_name: &str, value: &Constant) -> DbResult<()> {
        self.child()?.set_value(field_name, value)
    }

    fn insert(&mut self) -> DbResult<()> {
        self.child()?.insert()
    }

    fn delete(&mut self) -> DbResult<()> {
        self.child()?.delete()
    }

    fn get_rid(&mut self) -> DbResult<Rid> {
        self.child()?.get_rid()
    }

    fn move_to_rid(&mut self, rid: Rid) -> DbResult<()> {
        self.child()?.move_to_rid(rid)
    }
}

/// Restricts its child to a subset of the fields
pub struct ProjectScan {
    scan: Box<dyn Scan>,
    fields: Vec<String>,
}

impl ProjectScan {
    pub fn new(scan: Box<dyn Scan>, fields: Vec<String>) -> Self {
        Self { scan, fields }
    }

    fn check(&self, field_name: &str) -> DbResult<()> {
        if self.has_field(field_name) {
            Ok(())
        } else {
            Err(DbError::FieldNotFound(field_name.to_string()))
        }
    }
}

impl Scan for ProjectScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.scan.before_first()
    }

    fn next(&mut self) -> DbResult<bool> {
        self.scan.next()
    }

    fn get_int(&self, field_name: &str) -> DbResult<i32> {
        self.check(field_name)?;
        self.scan.get_int(field_name)
    }

    fn get_string(&self, field_name: &str) -> DbResult<String> {
        self.check(field_name)?;
        self.scan.get_string(field_name)
    }

    fn get_value(&self, field_name: &str) -> DbResult<Constant> {
        self.check(field_name)?;
        self.scan.get_value(field_name)
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.fields.iter().any(|f| f == field_name)
    }

    fn close(&mut self) {
        self.scan.close();
    }
}

/// Nested-loop cross product: every left row paired with every right row
pub struct ProductScan {
    left: Box<dyn Scan>,
    right: Box<dyn Scan>,
    has_left: bool,
}

impl ProductScan {
    pub fn new(left: Box<dyn Scan>, right: Box<dyn Scan>) -> DbResult<Self> {
        let mut scan = Self {
            left,
            right,
            has_left: false,
        };
        scan.before_first()?;
        Ok(scan)
    }

    /// Give back both inputs, e.g. to pair the same left input with another right side
    pub fn into_parts(self) -> (Box<dyn Scan>, Box<dyn Scan>) {
        (self.left, self.right)
    }
}

impl Scan for ProductScan {
    fn before_first(&mut self) -> DbResult<()> {
        self.left.before_first()?;
        self.has_left = self.left.next()?;
        self.right.before_first()
    }

    fn next(&mut self) -> DbResult<bool> {
        if !self.has_left {
            return Ok(false);
        }
        if self.right.next()? {
            return Ok(true);
        }
        self.right.before_first()?;
        self.has_left = self.left.next()?;
        Ok(self.has_left && self.right.next()?)
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
