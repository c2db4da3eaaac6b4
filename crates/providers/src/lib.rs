//! Model provider implementations for cadre.
//!
//! All providers implement the `cadre_core::Provider` trait.
//! The router builds the right provider from a model config.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderBuilder, ProviderRouter, ProviderSettings, create_provider};
