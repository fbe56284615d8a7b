pub mod builder;
pub mod bulk;
pub mod db;
pub mod grid;
pub mod models;
pub mod share;
pub mod tracker;
