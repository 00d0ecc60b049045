//! Phylogenetic tree display: tree transforms, layout strategies, a
//! two-pass calibration engine and painters that draw onto a [`Canvas`].
//!
//! [`Canvas`]: tree::scene_graph::Canvas

pub mod app;
pub mod export;
pub mod gui;
pub mod io;
pub mod settings;
pub mod tree;
pub mod ui;
