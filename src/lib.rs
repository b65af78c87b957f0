#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]

pub(crate) mod api;
pub mod app;
pub mod config;
pub mod context;
pub mod disagreement;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod language_detection;
pub mod lexicon;
pub mod normalize;
pub mod observability;
pub mod reconcile;
pub mod replay;
pub mod review;
pub mod scorer;
pub mod store;
