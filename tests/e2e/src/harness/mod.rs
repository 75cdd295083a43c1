mod db_manager;

pub use db_manager::{InstanceBuilder, TestDatabaseManager, TEST_DATABASE_URL_VAR};
