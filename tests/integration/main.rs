//! End-to-end tests: full cycles against an in-memory broker, static
//! signals, an in-memory ledger and a mocked mirror webhook.

mod cycle;
mod mock_broker;
