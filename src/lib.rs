pub mod analyzers;
pub mod error;
pub mod report;
pub mod store;
pub mod table;
pub mod transform;
