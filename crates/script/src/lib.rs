//! Output script classification and address extraction.

pub mod address;
pub mod pushdata;
pub mod standard;

pub use address::{base58check_decode, base58check_encode, script_to_address, AddressError};
pub use pushdata::{tokenize, Token};
pub use standard::{classify_script_pubkey, ScriptType};
