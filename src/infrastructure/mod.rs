pub mod core;
pub mod exchange;
pub mod mock;
pub mod notify;
pub mod persistence;
