//! Retry policies for distributed-store round trips.

pub mod retry;
