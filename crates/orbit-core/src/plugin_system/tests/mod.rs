pub mod common;
pub mod install_tests;
