/// Symmetric encryption, digests and key helpers.

pub mod cipher;
pub mod digest;
pub mod encoding;
pub mod keys;

pub use cipher::{derive_key, Cipher, DIGEST_SIZE, IV_SIZE, KEY_SIZE, OVERHEAD};
pub use digest::{file_digest, make_digest, make_hex_digest, md5_for_file, HashAlgorithm};
pub use encoding::{decode_data, decode_value, encode_data, encode_value, Encoding};
pub use keys::{gen_secret_key, gen_secret_key_from, DEFAULT_KEY_CHARSET, DEFAULT_KEY_SIZE};
