pub mod image;
pub mod job;
pub mod payload;
pub mod receipt;
