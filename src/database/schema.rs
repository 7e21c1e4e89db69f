//! Schema data structures
//!
//! Portable table definitions used by `migrate` and `drop_tables`. A
//! [`TableDef`] renders backend-specific DDL; anything that can describe its
//! table implements [`Model`].

use crate::database::connection::{validate_identifier, DatabaseBackend};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Portable column type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    BigInt,
    /// Unbounded text
    Text,
    /// Bounded text
    Varchar(u32),
    /// Boolean
    Boolean,
    /// Double precision float
    Real,
    /// Timestamp (UTC)
    Timestamp,
    /// Binary data
    Blob,
}

impl ColumnType {
    /// Type name for a backend
    pub fn sql_type(&self, backend: DatabaseBackend) -> String {
        match (self, backend) {
            (ColumnType::Integer, _) => "INTEGER".to_string(),
            (ColumnType::BigInt, DatabaseBackend::SQLite) => "INTEGER".to_string(),
            (ColumnType::BigInt, _) => "BIGINT".to_string(),
            (ColumnType::Text, _) => "TEXT".to_string(),
            (ColumnType::Varchar(len), DatabaseBackend::SQLite) => format!("VARCHAR({})", len),
            (ColumnType::Varchar(len), _) => format!("VARCHAR({})", len),
            (ColumnType::Boolean, DatabaseBackend::SQLite) => "INTEGER".to_string(),
            (ColumnType::Boolean, _) => "BOOLEAN".to_string(),
            (ColumnType::Real, DatabaseBackend::SQLite) => "REAL".to_string(),
            (ColumnType::Real, _) => "DOUBLE PRECISION".to_string(),
            (ColumnType::Timestamp, DatabaseBackend::SQLite) => "TEXT".to_string(),
            (ColumnType::Timestamp, DatabaseBackend::PostgreSQL) => "TIMESTAMPTZ".to_string(),
            (ColumnType::Timestamp, DatabaseBackend::MySQL) => "DATETIME(6)".to_string(),
            (ColumnType::Blob, DatabaseBackend::PostgreSQL) => "BYTEA".to_string(),
            (ColumnType::Blob, DatabaseBackend::MySQL) => "LONGBLOB".to_string(),
            (ColumnType::Blob, DatabaseBackend::SQLite) => "BLOB".to_string(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Varchar(len) => write!(f, "varchar({})", len),
            other => write!(f, "{}", format!("{:?}", other).to_lowercase()),
        }
    }
}

/// Represents a column in a table definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    /// ColumnDef name
    pub name: String,
    /// ColumnDef data type
    pub column_type: ColumnType,
    /// Whether the column is nullable
    pub nullable: bool,
    /// Whether this column is the primary key
    pub is_primary_key: bool,
    /// Generated by the database on insert (integer primary keys only)
    pub auto_increment: bool,
    /// Whether this column is unique
    pub is_unique: bool,
    /// Default value, as a SQL literal
    pub default_value: Option<String>,
}

impl ColumnDef {
    /// Nullable column of a type
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            is_primary_key: false,
            auto_increment: false,
            is_unique: false,
            default_value: None,
        }
    }

    /// Auto-incrementing 64-bit primary key
    pub fn id(name: impl Into<String>) -> Self {
        Self {
            nullable: false,
            is_primary_key: true,
            auto_increment: true,
            ..Self::new(name, ColumnType::BigInt)
        }
    }

    /// Mark NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark UNIQUE
    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    /// Set a default literal
    pub fn default_value(mut self, literal: impl Into<String>) -> Self {
        self.default_value = Some(literal.into());
        self
    }

    fn render(&self, backend: DatabaseBackend) -> String {
        let name = backend.quote_identifier(&self.name);

        if self.is_primary_key && self.auto_increment {
            return match backend {
                DatabaseBackend::SQLite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name),
                DatabaseBackend::PostgreSQL => format!("{} BIGSERIAL PRIMARY KEY", name),
                DatabaseBackend::MySQL => format!("{} BIGINT AUTO_INCREMENT PRIMARY KEY", name),
            };
        }

        let mut out = format!("{} {}", name, self.column_type.sql_type(backend));
        if self.is_primary_key {
            out.push_str(" PRIMARY KEY");
        }
        if !self.nullable && !self.is_primary_key {
            out.push_str(" NOT NULL");
        }
        if self.is_unique {
            out.push_str(" UNIQUE");
        }
        if let Some(ref default) = self.default_value {
            out.push_str(&format!(" DEFAULT {}", default));
        }
        out
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.column_type)?;
        if self.is_primary_key {
            write!(f, " PRIMARY KEY")?;
        }
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Portable table definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    /// TableDef name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Create an empty table definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Get a column by name
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check table and column names and column shape
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        if self.columns.is_empty() {
            return Err(crate::error::DatabaseError::Operation(format!(
                "table {} has no columns",
                self.name
            )));
        }
        for column in &self.columns {
            validate_identifier(&column.name)?;
        }
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for a backend
    pub fn create_statement(&self, backend: DatabaseBackend) -> Result<String> {
        self.validate()?;
        let columns: Vec<String> = self.columns.iter().map(|c| c.render(backend)).collect();
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            backend.quote_identifier(&self.name),
            columns.join(", ")
        ))
    }

    /// `DROP TABLE IF EXISTS` statement for a backend
    pub fn drop_statement(&self, backend: DatabaseBackend) -> Result<String> {
        validate_identifier(&self.name)?;
        Ok(format!(
            "DROP TABLE IF EXISTS {}",
            backend.quote_identifier(&self.name)
        ))
    }
}

impl fmt::Display for TableDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TableDef: {}", self.name)?;
        for column in &self.columns {
            writeln!(f, "  {}", column)?;
        }
        Ok(())
    }
}

/// Anything that can describe the table it is stored in
pub trait Model: Send + Sync {
    /// TableDef definition used by migrations
    fn definition(&self) -> TableDef;
}

impl Model for TableDef {
    fn definition(&self) -> TableDef {
        self.clone()
    }
}
