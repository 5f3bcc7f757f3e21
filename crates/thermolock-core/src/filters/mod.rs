pub mod dark_field;

pub use dark_field::DarkFieldCorrector;
