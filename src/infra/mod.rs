pub mod kubernetes;
pub mod memory;
pub mod web;
