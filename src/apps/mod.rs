pub mod descriptor;
pub mod error;
pub mod fetch;
pub mod installer;
pub mod manager;
pub mod runtime;
