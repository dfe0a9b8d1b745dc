pub mod api;
pub mod engine;
pub mod identity;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod wal;
