//! Column tables for every relation exposed over the wire.
//!
//! The SQL layer uses them to bind `INSERT` column lists and to check
//! `UPDATE` targets; the wire layer uses them to describe result rows.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    /// Calendar date, rendered as `YYYY-MM-DD`.
    Date,
    Bool,
}

/// How a column behaves in `INSERT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Required,
    Optional,
    /// Assigned by the engine, never by the client.
    Generated,
}

#[derive(Debug)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub insert: Insert,
    pub updatable: bool,
}

const fn col(name: &'static str, ty: ColumnType, insert: Insert, updatable: bool) -> Column {
    Column { name, ty, insert, updatable }
}

#[derive(Debug)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns a client may name in `INSERT`, in declaration order.
    pub fn insert_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.insert != Insert::Generated)
    }

    pub fn is_read_only(&self) -> bool {
        self.insert_columns().next().is_none() && !self.columns.iter().any(|c| c.updatable)
    }
}

use ColumnType::*;
use Insert::*;

const EVENT_COLUMNS: &[Column] = &[
    col("id", Text, Generated, false),
    col("team", Text, Required, false),
    col("username", Text, Required, true),
    col("role", Text, Generated, true),
    col("start", Date, Required, true),
    col("end", Date, Optional, true),
];

pub static TEAMS: Table = Table {
    name: "teams",
    columns: &[col("slug", Text, Required, false), col("name", Text, Optional, false)],
};

pub static USERS: Table = Table {
    name: "users",
    columns: &[col("username", Text, Required, false), col("team", Text, Required, false)],
};

pub static EVENTS: Table = Table {
    name: "events",
    columns: EVENT_COLUMNS,
};

pub static ROLES: Table = Table {
    name: "roles",
    columns: &[col("role", Text, Generated, false)],
};

/// Same shape as `events`; rows are the events sharing a day with the query range.
pub static OVERLAPPING: Table = Table {
    name: "overlapping",
    columns: &[
        col("id", Text, Generated, false),
        col("team", Text, Generated, false),
        col("username", Text, Generated, false),
        col("role", Text, Generated, false),
        col("start", Date, Generated, false),
        col("end", Date, Generated, false),
    ],
};

pub static CAPACITY: Table = Table {
    name: "capacity",
    columns: &[
        col("team", Text, Generated, false),
        col("start", Date, Generated, false),
        col("end", Date, Generated, false),
        col("available", Bool, Generated, false),
    ],
};

static TABLES: [&Table; 6] = [&TEAMS, &USERS, &EVENTS, &ROLES, &OVERLAPPING, &CAPACITY];

/// Look up a table by its lowercase name.
pub fn table(name: &str) -> Option<&'static Table> {
    TABLES.iter().copied().find(|t| t.name == name)
}
