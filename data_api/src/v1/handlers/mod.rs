pub mod status;
pub mod subscribers;
