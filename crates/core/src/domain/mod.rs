pub mod analysis;
pub mod article;
pub mod contract;
pub mod security;
