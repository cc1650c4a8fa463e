pub mod rest;
pub mod ws;
