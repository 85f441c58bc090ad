//! Chat bot core that turns attached media into platform-compliant stickers.
//!
//! The crate has two halves:
//!
//! - [`media`]: the conversion pipeline, from signature sniffing through
//!   external tools and size enforcement to the final sticker or image
//! - [`dispatch`]: the bounded-concurrency dispatcher driving one
//!   conversion per inbound chat event
//!
//! The chat transport is abstracted behind [`messaging::Messenger`].

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod messaging;

pub use config::Config;
pub use error::{Error, Result};
