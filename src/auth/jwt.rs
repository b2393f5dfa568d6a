use super::{TokenVerifier, VerifiedToken};
use crate::config::{AuthConfig, parse_scopes};
use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // caller identity
    pub exp: i64,    // Expiration time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    /// Space-separated scope string (OAuth style)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

impl Claims {
    fn scope_list(&self) -> Option<Vec<String>> {
        match (&self.scopes, &self.scope) {
            (Some(list), _) => Some(list.clone()),
            (None, Some(raw)) => Some(parse_scopes(raw)),
            (None, None) => None,
        }
    }
}

/// Local JWT verification (RS256 public key and/or HS256 secret)
///
/// The algorithm is taken from the token header and checked against the keys
/// that are actually configured, so an HS256 token is never verified with an
/// RSA public key used as an HMAC secret.
pub struct JwtVerifier {
    rsa_key: Option<DecodingKey>,
    hmac_key: Option<DecodingKey>,
    issuer: Option<String>,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let rsa_key = match &config.jwt_public_key {
            Some(pem) => {
                tracing::info!("Bearer tokens: RS256 verification enabled");
                Some(
                    DecodingKey::from_rsa_pem(pem.as_bytes())
                        .context("Failed to parse JWT_PUBLIC_KEY as RSA PEM")?,
                )
            }
            None => None,
        };
        let hmac_key = config.jwt_secret.as_ref().map(|secret| {
            tracing::info!("Bearer tokens: HS256 verification enabled");
            DecodingKey::from_secret(secret.as_bytes())
        });

        if rsa_key.is_none() && hmac_key.is_none() {
            anyhow::bail!(
                "No bearer token verification configured. Set either:\n\
                - JWT_PUBLIC_KEY (RS256)\n\
                - JWT_SECRET (HS256)"
            );
        }

        Ok(Self {
            rsa_key,
            hmac_key,
            issuer: config.jwt_issuer.clone(),
        })
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token).context("Malformed token header")?;

        let key = match header.alg {
            Algorithm::RS256 => self.rsa_key.as_ref().ok_or_else(|| {
                anyhow::anyhow!("Token uses RS256 algorithm, but JWT_PUBLIC_KEY is not configured")
            })?,
            Algorithm::HS256 => self.hmac_key.as_ref().ok_or_else(|| {
                anyhow::anyhow!("Token uses HS256 algorithm, but JWT_SECRET is not configured")
            })?,
            other => {
                anyhow::bail!(
                    "Unsupported JWT algorithm: {:?}. Only RS256 and HS256 are supported.",
                    other
                )
            }
        };

        let mut validation = Validation::new(header.alg);
        // Audience is not part of the gateway's contract
        validation.validate_aud = false;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let token_data = decode::<Claims>(token, key, &validation).map_err(|e| {
            tracing::debug!(error = %e, alg = ?header.alg, "Token verification failed");
            anyhow::anyhow!("{}", e)
        })?;
        Ok(token_data.claims)
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedToken> {
        let claims = self.verify_token(token)?;
        let scopes = claims.scope_list();
        Ok(VerifiedToken {
            subject: claims.sub,
            workspace_id: claims.workspace_id,
            scopes,
        })
    }
}
