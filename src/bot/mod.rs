//! Bot behavior: command handlers, the message router with its passive
//! detectors, the conversation engine, and reaction capture. Everything in
//! here is a plain function over the database plus parsed inputs, returning
//! reply values; the Discord gateway stays in `crate::gateway`.

pub mod commands;
pub mod conversation_handler;
pub mod message_handler;
pub mod reaction_handler;
pub mod ui_builder;

pub use message_handler::IncomingMessage;
