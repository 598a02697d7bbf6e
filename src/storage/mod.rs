pub mod image_archive;
pub mod profile_store;

pub use image_archive::ImageArchive;
pub use profile_store::{ProfileStore, Profiles};
