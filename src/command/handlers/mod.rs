//! Request handlers, one file per concern
//!
//! Each file adds methods to `CommandExecutor`; `CommandExecutor::execute`
//! picks the handler.

mod emergency;
mod flight;
mod status;
mod video;
