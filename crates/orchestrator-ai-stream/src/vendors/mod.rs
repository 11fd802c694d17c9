//! Backend-specific normalizers and backend constructors.
pub mod anthropic;
pub mod openai;
