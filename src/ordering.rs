//! Position assignment for records that live in an ordered partition:
//! modules within a course and contents within a module.
//!
//! Positions start at 0. A new record without an explicit position lands one
//! past the highest position in its partition. The read of the current
//! maximum and the insert are a single `INSERT ... SELECT` statement, so the
//! store's write lock covers both and two concurrent inserts into the same
//! partition cannot observe the same maximum. The `UNIQUE (partition, order)`
//! index on each table rejects anything that slips past.

use sqlx::{Sqlite, SqliteConnection, SqliteExecutor};
use tracing::{debug, instrument};

use crate::error::AppError;

/// The group a position is unique within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Modules of a course.
    Course(i64),
    /// Contents of a module.
    Module(i64),
}

impl Partition {
    pub fn key(&self) -> i64 {
        match self {
            Partition::Course(id) | Partition::Module(id) => *id,
        }
    }

    /// Table holding the ordered records.
    fn table(&self) -> &'static str {
        match self {
            Partition::Course(_) => "modules",
            Partition::Module(_) => "contents",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            Partition::Course(_) => "course_id",
            Partition::Module(_) => "module_id",
        }
    }

    /// Table the partition key points into.
    fn parent_table(&self) -> &'static str {
        match self {
            Partition::Course(_) => "courses",
            Partition::Module(_) => "modules",
        }
    }

    fn describe(&self) -> String {
        match self {
            Partition::Course(id) => format!("Course {}", id),
            Partition::Module(id) => format!("Module {}", id),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ColumnValue {
    Text(String),
    Integer(i64),
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Integer(value)
    }
}

/// An insert into an ordered table. Besides the partition key and the
/// position, callers supply the remaining columns of the row.
#[derive(Debug, Clone)]
pub struct OrderedInsert {
    partition: Partition,
    explicit_order: Option<i64>,
    columns: Vec<(&'static str, ColumnValue)>,
}

/// Id and position of a freshly inserted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct Placed {
    pub id: i64,
    pub order: i64,
}

impl OrderedInsert {
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            explicit_order: None,
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, name: &'static str, value: impl Into<ColumnValue>) -> Self {
        self.columns.push((name, value.into()));
        self
    }

    pub fn order(mut self, order: Option<i64>) -> Self {
        self.explicit_order = order;
        self
    }

    fn column_list(&self) -> String {
        let mut names = vec![self.partition.key_column()];
        names.extend(self.columns.iter().map(|(name, _)| *name));
        names.push("\"order\"");
        names.join(", ")
    }

    fn sql(&self) -> String {
        let table = self.partition.table();
        // key + caller columns
        let placeholders = vec!["?"; self.columns.len() + 1].join(", ");

        match self.explicit_order {
            Some(_) => format!(
                "INSERT INTO {table} ({cols}) VALUES ({placeholders}, ?) RETURNING id, \"order\"",
                table = table,
                cols = self.column_list(),
                placeholders = placeholders,
            ),
            None => format!(
                "INSERT INTO {table} ({cols}) \
                 SELECT {placeholders}, COALESCE(MAX(\"order\") + 1, 0) \
                 FROM {table} WHERE {key} = ? \
                 RETURNING id, \"order\"",
                table = table,
                cols = self.column_list(),
                placeholders = placeholders,
                key = self.partition.key_column(),
            ),
        }
    }

    /// Runs the insert. An unknown partition key, a negative explicit
    /// position or a position already taken are validation errors and leave
    /// nothing behind.
    #[instrument(skip(self, conn), fields(partition = ?self.partition, order = ?self.explicit_order))]
    pub async fn execute(self, conn: &mut SqliteConnection) -> Result<Placed, AppError> {
        if let Some(order) = self.explicit_order {
            if order < 0 {
                return Err(AppError::Validation(format!(
                    "Order must be zero or greater, got {}",
                    order
                )));
            }
        }

        ensure_partition_exists(&mut *conn, self.partition).await?;

        let sql = self.sql();
        let mut query = sqlx::query_as::<Sqlite, Placed>(&sql).bind(self.partition.key());
        for (_, value) in &self.columns {
            query = match value {
                ColumnValue::Text(text) => query.bind(text.clone()),
                ColumnValue::Integer(int) => query.bind(*int),
            };
        }
        query = match self.explicit_order {
            Some(order) => query.bind(order),
            None => query.bind(self.partition.key()),
        };

        let placed = query.fetch_one(&mut *conn).await.map_err(|err| {
            AppError::from_write(
                err,
                &format!("A record at this position in {}", self.partition.describe()),
            )
        })?;

        debug!(id = placed.id, order = placed.order, "Placed ordered record");
        Ok(placed)
    }
}

/// Fails with a validation error when the partition key does not resolve.
async fn ensure_partition_exists<'e, E>(
    executor: E,
    partition: Partition,
) -> Result<(), AppError>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)",
        partition.parent_table()
    );
    let exists: bool = sqlx::query_scalar(&sql)
        .bind(partition.key())
        .fetch_one(executor)
        .await?;

    if exists {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{} does not exist",
            partition.describe()
        )))
    }
}
