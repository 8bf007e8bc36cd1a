//! Domain Layer
//!
//! Lookup entities, the fetcher port and the pure DNS rendering services.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod services;
pub mod value_objects;
