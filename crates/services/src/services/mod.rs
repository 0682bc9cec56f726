pub mod accounts;
pub mod auth;
pub mod ckan;
pub mod config;
pub mod exporter;
pub mod hateoas;
pub mod importer;
pub mod jobs;
pub mod mail;
pub mod projects;
pub mod scheduler;
pub mod stats;
pub mod task_runs;
pub mod webhook;
