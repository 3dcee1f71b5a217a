//! Integration tests for the deploy console

mod mocks;

mod test_poller;
mod test_push_client;
mod test_server;
mod test_store;
