pub mod lancedb;
