//! Shared fixtures for Quota Hub benchmarks.

pub mod bench_support;
