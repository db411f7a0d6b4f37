// tests/integration/mod.rs - Integration test modules

pub mod config;
pub mod distribution;
pub mod recovery;
pub mod sharing;
pub mod storage;

/// Common test header
pub fn print_test_header(test_name: &str) {
    println!("Testing {}...", test_name);
}
