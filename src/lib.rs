//! CineFlow - playback-event pipeline
//!
//! Three services share this crate:
//! - streaming: verifies a user and a movie over HTTP, then publishes a
//!   durable playback event to RabbitMQ
//! - user: user registry plus the consumer that records playback events
//! - catalog: movie lookups against the IMDb API with a mock fallback

pub mod bus;
pub mod clients;
pub mod config;
pub mod handlers;
pub mod orchestration;
pub mod playback;
pub mod services;
pub mod utils;

pub use playback::{PlaybackEvent, PlaybackStartRequest, UserId};
