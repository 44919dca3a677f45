//! Weather pipeline: prepare → aggregate → annual / multi-year → compare.

pub mod aggregate;
pub mod annual;
pub mod compare;
pub mod multi_year;
pub mod prepare;
