//! Test suites for the sandbox launcher library.

mod support;
