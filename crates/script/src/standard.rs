//! Standard script template classification.
//!
//! Scripts are matched against their tolerant token stream, so a malformed
//! push never aborts indexing; a script that decodes short simply fits no
//! template and classifies as unknown.

use crate::pushdata::{tokenize, Token};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    Unknown,
}

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

const PUBKEY_HASH_LEN: usize = 20;
const COMPRESSED_PUBKEY_LEN: usize = 33;
const UNCOMPRESSED_PUBKEY_LEN: usize = 65;

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    match template_payload(script) {
        Some((kind, _)) => kind,
        None => ScriptType::Unknown,
    }
}

/// Matched template plus the bytes an address derives from: the pushed
/// 20-byte hash for P2PKH/P2SH, the raw pubkey for bare P2PK.
pub(crate) fn template_payload(script: &[u8]) -> Option<(ScriptType, Vec<u8>)> {
    let tokens = tokenize(script);
    match tokens.as_slice() {
        [
            Token::Op(OP_DUP),
            Token::Op(OP_HASH160),
            Token::Push(hash),
            Token::Op(OP_EQUALVERIFY),
            Token::Op(OP_CHECKSIG),
        ] if hash.len() == PUBKEY_HASH_LEN => Some((ScriptType::P2Pkh, hash.clone())),
        [Token::Op(OP_HASH160), Token::Push(hash), Token::Op(OP_EQUAL)]
            if hash.len() == PUBKEY_HASH_LEN =>
        {
            Some((ScriptType::P2Sh, hash.clone()))
        }
        [Token::Push(key), Token::Op(OP_CHECKSIG)]
            if key.len() == COMPRESSED_PUBKEY_LEN || key.len() == UNCOMPRESSED_PUBKEY_LEN =>
        {
            Some((ScriptType::P2Pk, key.clone()))
        }
        _ => None,
    }
}
