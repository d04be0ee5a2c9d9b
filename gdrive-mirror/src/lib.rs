pub mod config;
pub mod oauth_flow;
pub mod retry;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod sync;
