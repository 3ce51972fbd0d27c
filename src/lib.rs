// Library for tests to access modules

pub mod aggregation;
pub mod config;
pub mod history_repo;
pub mod models;
pub mod routes;
pub mod version;
pub mod worker;
