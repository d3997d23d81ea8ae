//! Plain data shared by the codec, the container and the loader
#![cfg_attr(all(feature = "nostd", not(test)), no_std)]

pub mod addresses;
pub mod patch;

pub use patch::RawQuad;
