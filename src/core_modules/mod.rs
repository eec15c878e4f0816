pub mod blob;
pub mod blob_tracker;
pub mod motion_analyzer;
