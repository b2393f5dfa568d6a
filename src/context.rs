use crate::auth::{
    ApiKeyAuthenticator, AuthResolver, Authenticator, BearerTokenAuthenticator, InMemoryKeyStore,
    JwtVerifier, KeyStore, RestKeyStore, TokenVerifier,
};
use crate::config::Config;
use crate::gateway::{
    CircuitSnapshot, GatewayController, InMemoryStore, RateLimitWindow, RateLimiter,
    RequestForwarder, StateStore,
};
use anyhow::Result;
use std::sync::Arc;

/// Application context containing shared dependencies
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub controller: Arc<GatewayController>,
}

/// Pluggable collaborators; anything left `None` is built from config
#[derive(Default)]
pub struct Collaborators {
    pub key_store: Option<Arc<dyn KeyStore>>,
    pub token_verifier: Option<Arc<dyn TokenVerifier>>,
    pub rate_limit_store: Option<Arc<dyn StateStore<RateLimitWindow>>>,
    pub breaker_store: Option<Arc<dyn StateStore<CircuitSnapshot>>>,
}

impl AppContext {
    /// Build everything from configuration
    pub fn from_config(config: Config) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        let key_store = match collaborators.key_store {
            Some(store) => store,
            None => key_store_from_config(&config)?,
        };
        let token_verifier: Arc<dyn TokenVerifier> = match collaborators.token_verifier {
            Some(verifier) => verifier,
            None => Arc::new(JwtVerifier::new(&config.auth)?),
        };
        let rate_limit_store = collaborators
            .rate_limit_store
            .unwrap_or_else(|| Arc::new(InMemoryStore::<RateLimitWindow>::new()));
        let breaker_store = collaborators
            .breaker_store
            .unwrap_or_else(|| Arc::new(InMemoryStore::<CircuitSnapshot>::new()));

        let rate_limiter = Arc::new(RateLimiter::new(rate_limit_store));
        let authenticators: Vec<Arc<dyn Authenticator>> = vec![
            Arc::new(ApiKeyAuthenticator::new(key_store, rate_limiter.clone())),
            Arc::new(BearerTokenAuthenticator::new(
                token_verifier,
                config.auth.bearer_default_scopes.clone(),
            )),
        ];
        let forwarder = Arc::new(RequestForwarder::new(
            config.upstream.clone(),
            Arc::new(config.circuit_breaker.clone()),
            breaker_store,
        )?);

        let controller = Arc::new(GatewayController::new(
            AuthResolver::new(authenticators),
            rate_limiter,
            forwarder,
            config.rate_limit.clone(),
            config.logging.hash_salt.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            controller,
        })
    }
}

fn key_store_from_config(config: &Config) -> Result<Arc<dyn KeyStore>> {
    if let Some(url) = &config.auth.key_store_url {
        tracing::info!(url = %url, "Using REST API key store");
        return Ok(Arc::new(RestKeyStore::new(
            url,
            config.auth.key_store_service_key.clone(),
        )?));
    }
    match &config.auth.api_keys_file {
        Some(path) => Ok(Arc::new(InMemoryKeyStore::from_file(path)?)),
        None => {
            tracing::warn!("No API key store configured, API keys will be rejected");
            Ok(Arc::new(InMemoryKeyStore::new(Vec::new())))
        }
    }
}
