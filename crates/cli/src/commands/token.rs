//! `pulse-cli token` - encryption of store access tokens.

use std::io::{BufRead, Write};

use pulse_admin::config::PulseConfig;
use pulse_admin::shopify::TokenCipher;
use secrecy::{ExposeSecret, SecretString};

use super::CliError;

/// Print a new base64 key for `SHOPIFY_TOKEN_ENCRYPTION_KEY`.
pub fn generate_key() {
    let key = TokenCipher::generate_key();
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", key.expose_secret());
}

/// Encrypt `token` (or the first line of stdin) and print the stored form.
pub fn encrypt(config: &PulseConfig, token: Option<String>) -> Result<(), CliError> {
    let key = config
        .shopify
        .token_key
        .as_ref()
        .ok_or(CliError::MissingEnvVar("SHOPIFY_TOKEN_ENCRYPTION_KEY"))?;
    let cipher = TokenCipher::from_base64_key(key)?;

    let token = match token {
        Some(token) => SecretString::from(token),
        None => read_token(std::io::stdin().lock())?,
    };

    let stored = encrypt_with(&cipher, &token)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{stored}")?;
    Ok(())
}

fn read_token(mut input: impl BufRead) -> Result<SecretString, CliError> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(SecretString::from(line.trim().to_string()))
}

fn encrypt_with(cipher: &TokenCipher, token: &SecretString) -> Result<String, CliError> {
    let plaintext = token.expose_secret().trim();
    if plaintext.is_empty() {
        return Err(CliError::Refused("token is empty".to_string()));
    }
    if TokenCipher::is_cipher_format(plaintext) {
        return Err(CliError::Refused("token is already encrypted".to_string()));
    }
    Ok(cipher.encrypt(plaintext)?)
}
