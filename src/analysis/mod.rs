//! Daily analytics jobs that write back into the database.

pub mod chip;
pub mod recommend;
pub mod technical;
