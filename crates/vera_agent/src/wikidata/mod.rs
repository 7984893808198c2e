//! Knowledge-base endpoint boundary.

pub mod client;

pub use client::{
    EndpointError, FakeEndpoint, ResultsBuilder, SparqlBinding, SparqlEndpoint, SparqlResults,
    SparqlValue, WdqsClient,
};
