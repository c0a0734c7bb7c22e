pub mod utils;

mod auth;
mod ordering;
