/// Random secret-key generation.

use crate::error::{KitError, Result};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;

pub const DEFAULT_KEY_SIZE: usize = 72;

/// Letters and digits.
pub const DEFAULT_KEY_CHARSET: &str = "an";

/// Letters, digits and punctuation.
pub const SECRET_KEY_CHARSET: &str = "anp";

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Build the alphabet described by `charset`.
///
/// Flags: `a` letters, `l` lowercase, `u` uppercase, `n` digits,
/// `p` punctuation. Repeated and unknown flags are ignored.
pub fn charset_alphabet(charset: &str) -> String {
    let (mut lower, mut upper, mut digits, mut punct) = (false, false, false, false);
    for flag in charset.chars() {
        match flag {
            'a' => {
                lower = true;
                upper = true;
            }
            'l' => lower = true,
            'u' => upper = true,
            'n' => digits = true,
            'p' => punct = true,
            _ => {}
        }
    }

    let mut alphabet = String::new();
    for (enabled, chars) in [(lower, LOWERCASE), (upper, UPPERCASE), (digits, DIGITS), (punct, PUNCTUATION)] {
        if enabled {
            alphabet.push_str(chars);
        }
    }
    alphabet
}

/// Random string of `size` characters from the classes in `charset`.
pub fn gen_secret_key(size: usize, charset: &str) -> Result<String> {
    gen_secret_key_from(size, &charset_alphabet(charset))
}

/// Random string of `size` characters drawn from `alphabet`.
pub fn gen_secret_key_from(size: usize, alphabet: &str) -> Result<String> {
    let chars: Vec<char> = alphabet.chars().collect();
    if chars.is_empty() {
        return Err(KitError::ConfigError("Empty key alphabet".to_string()));
    }

    let mut rng = OsRng;
    Ok((0..size)
        .filter_map(|_| chars.choose(&mut rng).copied())
        .collect())
}
