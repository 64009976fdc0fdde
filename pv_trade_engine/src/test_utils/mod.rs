//! Utilities for standing up throwaway test databases.
pub mod prepare_env;

pub use prepare_env::{create_database, new_test_database, prepare_test_env, random_db_path, run_migrations};
