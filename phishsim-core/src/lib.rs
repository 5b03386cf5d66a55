// phishsim-core/src/lib.rs

pub mod db;
pub mod repositories;
pub mod token;
pub mod collaborators;
pub mod services;
pub mod tasks;
pub mod http;
pub mod test_utils;

pub use db::Database;
pub use phishsim_common::Error;
