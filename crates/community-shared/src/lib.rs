//! # community-shared
//!
//! Types shared by the store and the server: identifiers, the system rank
//! table with its resolution rules, and the WebSocket frame codec.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod rank;
pub mod types;

pub use error::{FrameError, RankTableError};
pub use types::{ChatId, Gender, MessageId, RankId, UserId};
