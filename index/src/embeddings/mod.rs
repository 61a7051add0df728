//! Embedding provider implementations.

pub mod remote;

pub use remote::RemoteEmbeddings;
