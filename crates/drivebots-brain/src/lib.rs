//! Controller networks for DriveBots agents.

pub mod feedforward;

pub use feedforward::FeedForwardNetwork;
