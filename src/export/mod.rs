pub mod svg;

pub use svg::export_svg;
