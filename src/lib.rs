pub mod catalog;
pub mod core;
pub mod crm;
pub mod effects;
pub mod notify;
pub mod store;
