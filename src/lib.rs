// A small wide-column store over a sorted row keyspace, plus the Scrabble
// games schema, bulk loader, and range-scan queries that run on top of it.
// main.rs wires these into the CreateTable/LoadTable/Query actions.

pub mod encoding;
pub mod keys;
pub mod load;
pub mod query;
pub mod schema;
pub mod store;
