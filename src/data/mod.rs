pub mod export;
pub mod method;
pub mod segment;
