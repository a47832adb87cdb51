pub mod common;
mod work_store_tests;
