//! HealFS management subsystem: volume surface, heal operations, arequal collection

pub mod arequal;
pub mod config;
pub mod heal_ops;
pub mod volume;
