// Library exports for RentXpert.
// Integration tests build the router from here with fake collaborators.

pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod external;
pub mod extractors;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
pub mod sweepers;
