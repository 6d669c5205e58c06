pub mod autosave;
pub mod history;
pub mod layout;
pub mod writer;

pub use autosave::AutoSaveOrganizer;
pub use history::{list_saved_images, SavedImage};
pub use layout::{document_folder_name, OutputLayout, UNSAVED_DOCUMENT};
pub use writer::{ImageWriter, PngFileWriter};
