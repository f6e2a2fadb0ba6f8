//! Camera capture tool and dataset batch tools for blood-cell detection.

pub mod acquisition;
pub mod capture;
pub mod console;
pub mod dataset;
pub mod error;
pub mod frame;
pub mod output;
pub mod report;
pub mod train;
