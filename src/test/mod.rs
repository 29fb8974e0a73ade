mod access;
mod auth;
mod delivery;
mod ingest;
mod utils;
