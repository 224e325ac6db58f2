//! Schema types and canonical type system

use serde::{Deserialize, Serialize};

/// Portable logical type system
///
/// Maps parquet/CSV/SQL type spellings to a common representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogicalType {
    /// Boolean type
    Bool,

    /// Integer type (any precision)
    Int,

    /// Floating point (any precision)
    Float,

    /// Decimal with precision and scale
    Decimal {
        precision: Option<u16>,
        scale: Option<u16>,
    },

    /// String/text type
    String,

    /// Date (no time component)
    Date,

    /// Timestamp (with time component)
    Timestamp,

    /// JSON/Variant type
    Json,

    /// Unknown type (matches anything)
    Unknown,
}

impl LogicalType {
    /// Parse a declared or observed type name
    ///
    /// Unrecognized spellings map to [`LogicalType::Unknown`].
    pub fn parse(data_type: &str) -> Self {
        let lower = data_type.trim().to_lowercase();

        match lower.as_str() {
            "int" | "integer" | "bigint" | "smallint" | "tinyint" | "int8" | "int16" | "int32"
            | "int64" | "uint8" | "uint16" | "uint32" | "uint64" | "long" => Self::Int,

            "float" | "double" | "real" | "float16" | "float32" | "float64" => Self::Float,

            s if s.starts_with("decimal") || s.starts_with("numeric") => {
                // decimal(precision, scale)
                if let (Some(start), Some(end)) = (s.find('('), s.find(')')) {
                    let parts: Vec<&str> = s[start + 1..end].split(',').map(|p| p.trim()).collect();
                    let precision = parts.first().and_then(|p| p.parse().ok());
                    let scale = parts.get(1).and_then(|p| p.parse().ok());
                    return Self::Decimal { precision, scale };
                }
                Self::Decimal {
                    precision: None,
                    scale: None,
                }
            }

            "string" | "str" | "utf8" | "large_string" | "large_utf8" | "varchar" | "char"
            | "text" | "object" | "category" => Self::String,

            "bool" | "boolean" => Self::Bool,

            "date" | "date32" | "date64" => Self::Date,

            s if s.starts_with("timestamp") || s.starts_with("datetime") => Self::Timestamp,

            "json" | "jsonb" | "variant" => Self::Json,

            _ => Self::Unknown,
        }
    }

    /// Whether a value observed as `actual` satisfies a column declared as `self`
    pub fn is_compatible_with(&self, actual: &LogicalType) -> bool {
        match (self, actual) {
            (a, b) if a == b => true,

            (_, Self::Unknown) | (Self::Unknown, _) => true,

            // Int widens to float and decimal
            (Self::Float, Self::Int) => true,

            (Self::Decimal { .. }, Self::Decimal { .. }) => true,
            (Self::Decimal { .. }, Self::Int) => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "BOOL"),
            Self::Int => write!(f, "INT"),
            Self::Float => write!(f, "FLOAT"),
            Self::Decimal { precision, scale } => match (precision, scale) {
                (Some(p), Some(s)) => write!(f, "DECIMAL({}, {})", p, s),
                (Some(p), None) => write!(f, "DECIMAL({})", p),
                _ => write!(f, "DECIMAL"),
            },
            Self::String => write!(f, "STRING"),
            Self::Date => write!(f, "DATE"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Json => write!(f, "JSON"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl From<String> for LogicalType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<LogicalType> for String {
    fn from(value: LogicalType) -> Self {
        value.to_string()
    }
}

fn default_type() -> LogicalType {
    LogicalType::Unknown
}

/// A declared column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Expected logical type
    #[serde(rename = "type", default = "default_type")]
    pub logical_type: LogicalType,

    /// Whether nulls (and absence) are acceptable
    #[serde(default)]
    pub nullable: bool,
}

impl Column {
    /// Create a new non-nullable column
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: false,
        }
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// A named, ordered collection of columns referenced by `schema_ref`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name
    pub name: String,

    /// Ordered list of columns
    pub columns: Vec<Column>,
}

impl Schema {
    /// Create a schema from columns
    pub fn from_columns(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Find a column by name
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
