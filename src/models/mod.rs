//! Wire-level data models for the photo compression service.
//!
//! These are transient value objects: nothing here outlives a request, and
//! no persistent schema is owned by this service.

pub mod upload;
