//! HTTP adapters for the notification collaborators.

pub mod http;

pub use http::{HttpNotifier, NotifierConfig};
