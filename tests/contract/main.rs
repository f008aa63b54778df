//! Contract tests against a mock backend.

mod common;
mod session;
