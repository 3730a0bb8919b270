/*
    Tests for the core_store subsystem

    Test suite covering:
    - Link inventory operations and queries
    - Tombstone ordering edge cases
    - Concurrent writers on one key
*/

pub mod concurrency_tests;
