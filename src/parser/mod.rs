//! Diploma parser module
//!
//! Reads the worker's reports from the results bucket, extracts the holder,
//! qualification, institution and specialty from the first page and stores
//! them in Postgres. Reports that cannot be parsed completely are moved to
//! the errors bucket for manual review.

mod consumer;
mod first_page;
mod sink;

pub use consumer::{ParseOutcome, ParseSummary, ResultParser};
pub use first_page::{
    parse_direction, parse_first_page, parse_full_name, parse_specialization, parse_university,
    ParsedDiploma,
};
pub use sink::{DiplomaSink, PgDiplomaSink};
