pub mod category;
pub mod chunks;
pub mod codec;
pub mod record;

pub use category::Category;
pub use codec::{decode, decode_bytes, decode_payload, embed, encode, DecodedImage, RawTextEntry};
pub use record::{clean_metadata_value, GenerationRecord, LoraEntry};
