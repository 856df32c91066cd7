//! Grouping, ranking and bucketing over a [`RecordTable`](crate::table::RecordTable).
//!
//! [`aggregate`] and [`rank`] are the two engines; [`query`] builds the
//! named dashboard queries on top of them. Nothing here rounds: values leave
//! at full precision and [`crate::output`] formats them.

pub mod aggregate;
pub mod bucket;
pub mod query;
pub mod rank;
pub mod types;
pub mod utility;
