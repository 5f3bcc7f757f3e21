pub mod acquire;
pub mod cancel;
pub mod consts;
pub mod error;
pub mod filters;
pub mod frame;
pub mod lockin;
pub mod sim;
pub mod source;
pub mod stack;
pub mod stimulus;
pub mod temperature;
