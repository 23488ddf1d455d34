pub mod common;
mod content_tests;
mod queue_tests;
mod run_tests;
