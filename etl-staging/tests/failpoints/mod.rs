#![cfg(all(feature = "failpoints", feature = "test-utils"))]

mod finalizer_test;
