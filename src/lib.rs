pub mod chunking;
pub mod config;
pub mod corpus;
pub mod database;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod generator;
pub mod index;
pub mod rag;
pub mod retriever;
pub mod server;

#[cfg(test)]
mod test_support;
