mod catalog_tests;
mod common;
