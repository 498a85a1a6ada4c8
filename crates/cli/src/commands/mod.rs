pub mod ask;
pub mod budget;
pub mod decompose;
pub mod onboard;
pub mod runtime;
pub mod status;
