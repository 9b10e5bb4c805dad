//! Commonbase bot: a Discord book-club companion that captures quotes,
//! thoughts and reactions into a shared knowledge base, resolving which book
//! each capture belongs to through short persisted conversations.

pub mod bot;
pub mod config;
pub mod conversation;
pub mod db;
pub mod gateway;
pub mod matcher;
pub mod ocr;
