/*
    Tests for the core_mastership subsystem

    Test suite covering:
    - Single master per device under concurrent role changes
    - Event delivery and clock terms through the coordinator
*/
