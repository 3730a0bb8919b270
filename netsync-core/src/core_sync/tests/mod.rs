/*
    Tests for the core_sync subsystem

    Test suite covering:
    - Convergence of arbitrary divergent replicas
    - Gossip service push and pull over an in-memory network
*/
