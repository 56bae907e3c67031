//! Domain layer: validated reads and writes, one transaction per
//! operation. Everything here is storage-shaped (it speaks in `Task`,
//! `Entity`, row counts) — mode projection and pagination envelopes are
//! the query layer's job, not this one's.

pub mod entities;
pub mod tasks;
