pub mod file_tests;
