//! Kernel Unit Tests Module
//!
//! End-to-end tests of the loader and the process lifecycle on the hosted
//! platform.

mod loader_tests;
