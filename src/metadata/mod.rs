//! Physical metadata layer: tokens, headers, streams, tables and method bodies.

pub mod container;
pub mod cor20header;
pub mod method;
pub mod root;
pub mod streams;
pub mod tables;
pub mod token;
