//! The row contract shared by every lockable table.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::FromRow;
use sqlx::postgres::PgRow;
use uuid::Uuid;

/// A persisted row addressable by a UUID primary key named `id`.
///
/// Stores read entities either through `FromRow` (PostgreSQL) or serde
/// (in-memory), and write them as a JSON row image built from
/// [`Entity::COLUMNS`], so both paths must agree on column names.
pub trait Entity:
    Clone
    + Debug
    + Send
    + Sync
    + Unpin
    + Serialize
    + DeserializeOwned
    + for<'r> FromRow<'r, PgRow>
    + 'static
{
    /// Typed primary key.
    type Id: Copy
        + Ord
        + Hash
        + Debug
        + Display
        + Send
        + Sync
        + Into<Uuid>
        + From<Uuid>
        + 'static;

    /// Table name.
    const TABLE: &'static str;

    /// Every column, primary key first. Must match the serde field names.
    const COLUMNS: &'static [&'static str];

    /// The row's primary key.
    fn id(&self) -> Self::Id;
}
