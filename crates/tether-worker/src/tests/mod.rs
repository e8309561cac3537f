//! Unit tests for the worker runtime.

mod runtime_tests;
