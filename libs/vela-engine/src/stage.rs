use std::fmt;

use vela_api::{ErrorKind, Value};

use crate::udf::Udf;

/// What a stage does to each row. Column positions are resolved when the
/// stage is built; UDFs already have named column access bound.
#[derive(Debug, Clone)]
pub enum StageKind {
    /// Result replaces the row; a tuple result becomes a multi-column row.
    Map(Udf),
    /// Keeps rows whose result is truthy.
    Filter(Udf),
    /// One-parameter UDF over a single column; the result replaces that column.
    MapColumn { column: usize, udf: Udf },
    /// UDF over the whole row; the result replaces `column` or is appended.
    WithColumn { column: Option<usize>, udf: Udf },
    /// Projection by position.
    Select(Vec<usize>),
    /// Drops repeated rows keeping the first.
    Unique,
}

impl StageKind {
    pub fn udf(&self) -> Option<&Udf> {
        match self {
            StageKind::Map(udf)
            | StageKind::Filter(udf)
            | StageKind::MapColumn { udf, .. }
            | StageKind::WithColumn { udf, .. } => Some(udf),
            StageKind::Select(_) | StageKind::Unique => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Map(_) => "map",
            StageKind::Filter(_) => "filter",
            StageKind::MapColumn { .. } => "map_column",
            StageKind::WithColumn { .. } => "with_column",
            StageKind::Select(_) => "select",
            StageKind::Unique => "unique",
        }
    }

    /// Columns the UDF sees: a single column for `MapColumn`, the row otherwise.
    pub(crate) fn udf_input<'r>(&self, row: &'r [Value]) -> Option<&'r [Value]> {
        match self {
            StageKind::MapColumn { column, .. } => row.get(*column..*column + 1),
            _ => Some(row),
        }
    }
}

/// Exception handler attached to a UDF stage.
#[derive(Debug, Clone)]
pub enum Handler {
    /// Re-run failing rows through another UDF on the general path.
    Resolve { kind: ErrorKind, udf: Udf },
    /// Drop failing rows.
    Ignore { kind: ErrorKind },
}

impl Handler {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Handler::Resolve { kind, .. } | Handler::Ignore { kind } => *kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub kind: StageKind,
    pub handlers: Vec<Handler>,
}

impl Stage {
    pub fn new(kind: StageKind) -> Self {
        let name = match kind.udf() {
            Some(udf) => format!("{}({udf})", kind.name()),
            None => kind.name().to_string(),
        };
        Self {
            name,
            kind,
            handlers: Vec::new(),
        }
    }

    /// First handler for `kind` not yet marked in `used`, in attachment order.
    pub fn handler_for(&self, kind: ErrorKind, used: &[bool]) -> Option<(usize, &Handler)> {
        self.handlers
            .iter()
            .enumerate()
            .find(|(i, h)| !used.get(*i).copied().unwrap_or(false) && h.kind() == kind)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
