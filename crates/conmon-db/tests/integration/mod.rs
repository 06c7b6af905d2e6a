pub mod common;
mod repository_tests;
mod store_tests;
