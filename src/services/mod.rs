pub mod achievements;
pub mod config;
pub mod local_store;
pub(crate) mod paths;
pub mod theme;
