pub mod catalog_tests;
pub mod registry_tests;
