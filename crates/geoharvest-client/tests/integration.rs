//! Integration tests for geoharvest-client.
//!
//! Each protocol client is driven through the full `HarvestService` against
//! a `wiremock` server, so these tests cover request building, response
//! parsing, mapping and what finally lands in the index.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test integration -p geoharvest-client
//! ```

mod integration {
    pub mod ckan_tests;
    pub mod common;
    pub mod csw_tests;
    pub mod wfs_tests;
}
