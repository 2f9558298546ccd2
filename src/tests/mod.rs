//! End-to-end tests of the billing pipeline against an in-memory database.

mod pipeline;
