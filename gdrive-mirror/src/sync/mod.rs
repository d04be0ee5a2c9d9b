pub mod backup;
pub mod conversion;
pub mod diff;
pub mod engine;
pub mod index;
pub mod lock;
pub mod paths;
pub mod prune;
pub mod transfer;
