use rand::{distributions::Alphanumeric, seq::SliceRandom, Rng};
use secrecy::SecretString;

use crate::services::identity::MIN_SECRET_LEN;

const SYMBOLS: &[u8] = b"!@#$%&*?";

/// Generate a temporary login secret of at least `length` characters
/// containing a digit, an upper-case letter, a lower-case letter and a
/// symbol.
pub fn generate_temporary_secret(length: usize) -> SecretString {
    let mut rng = rand::thread_rng();
    let length = length.max(MIN_SECRET_LEN);

    let mut chars: Vec<char> = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(length - 4)
        .map(char::from)
        .collect();
    chars.push(char::from(rng.gen_range(b'0'..=b'9')));
    chars.push(char::from(rng.gen_range(b'A'..=b'Z')));
    chars.push(char::from(rng.gen_range(b'a'..=b'z')));
    chars.push(char::from(*SYMBOLS.choose(&mut rng).unwrap_or(&b'@')));
    chars.shuffle(&mut rng);

    SecretString::new(chars.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_secret_has_every_character_class() {
        let secret = generate_temporary_secret(10);
        let secret = secret.expose_secret();

        assert_eq!(secret.chars().count(), 10);
        assert!(secret.chars().any(|c| c.is_ascii_digit()));
        assert!(secret.chars().any(|c| c.is_ascii_uppercase()));
        assert!(secret.chars().any(|c| c.is_ascii_lowercase()));
        assert!(secret.bytes().any(|b| SYMBOLS.contains(&b)));
    }

    #[test]
    fn test_short_request_is_raised_to_gateway_minimum() {
        let secret = generate_temporary_secret(2);
        assert_eq!(secret.expose_secret().chars().count(), MIN_SECRET_LEN);
    }

    #[test]
    fn test_secrets_differ() {
        let a = generate_temporary_secret(12);
        let b = generate_temporary_secret(12);
        assert_ne!(a.expose_secret(), b.expose_secret());
    }
}
