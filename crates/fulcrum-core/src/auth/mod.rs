//! HMAC JWT minting and verification.
//!
//! Tokens carry a single `Allow` claim listing granted permissions; they do
//! not expire, so verification disables the registered-claim checks. The
//! proxy mints one token at startup for its own refresh traffic and
//! verifies inbound tokens with the same secret and algorithm.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "Allow")]
    pub allow: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Maps the configured algorithm name; anything unrecognized falls back to
/// HS256.
fn algorithm(name: &str) -> Algorithm {
    match name {
        "HS512" => Algorithm::HS512,
        _ => Algorithm::HS256,
    }
}

/// Signs a token granting `permissions`.
pub fn mint_token(secret: &[u8], alg: &str, permissions: &[String]) -> Result<String, AuthError> {
    let claims = Claims {
        allow: permissions.to_vec(),
    };
    let token = encode(
        &Header::new(algorithm(alg)),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verifies signature and shape, returning the granted permissions.
pub fn verify_token(token: &str, secret: &[u8], alg: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(algorithm(alg));
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(data.claims)
}
