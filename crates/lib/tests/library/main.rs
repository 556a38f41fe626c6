mod common;
mod environment_tests;
mod job_tests;
mod persistence_tests;
mod wildcard_tests;
