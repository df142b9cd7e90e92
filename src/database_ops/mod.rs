pub mod db;
pub mod importer;
pub mod memory;
pub mod opentdb;
pub mod resolver;
pub mod store;
