pub mod dto;
pub mod fetch;
pub mod handler;
