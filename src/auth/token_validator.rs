use crate::auth::endpoints::IdentityEndpoints;
use crate::auth::types::{AuthError, Principal};
use crate::config::AuthenticationConfig;
use chrono::DateTime;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use lru::LruCache;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Upper bound on keys taken from one JWKS document
const KEY_CACHE_CAPACITY: usize = 32;

/// Unknown kids and failed refreshes trigger a new fetch at most this often
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Placeholder multi-tenant metadata uses in its `issuer`
const TENANT_PLACEHOLDER: &str = "{tenantid}";

/// Token validation tuning
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    /// Leeway applied to `exp` and `nbf`
    pub clock_skew_seconds: u64,
    /// How long fetched signing keys are trusted before re-fetching
    pub metadata_refresh: Duration,
}

impl ValidatorSettings {
    pub fn from_config(config: &AuthenticationConfig) -> Self {
        Self {
            clock_skew_seconds: config.clock_skew_seconds,
            metadata_refresh: Duration::from_secs(config.metadata_refresh_seconds),
        }
    }
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            clock_skew_seconds: 300,
            metadata_refresh: Duration::from_secs(3600),
        }
    }
}

/// Subset of the OpenID Connect discovery document
#[derive(Debug, Deserialize)]
struct OpenIdMetadata {
    #[serde(default)]
    issuer: Option<String>,
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(rename = "use", default)]
    key_use: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// Claims read from an access token; signature and audience are checked by `jsonwebtoken`
#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    iss: String,
    exp: i64,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    tid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    scp: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

/// Keys published by the last successful JWKS fetch
struct SigningKeys {
    issuer: String,
    keys: LruCache<String, DecodingKey>,
    fetched_at: Option<Instant>,
    attempted_at: Option<Instant>,
    last_error: Option<AuthError>,
}

enum KeyLookup {
    Hit(DecodingKey, String),
    Miss(AuthError),
    Refresh,
}

impl SigningKeys {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }

    fn recently_attempted(&self) -> bool {
        self.attempted_at
            .is_some_and(|at| at.elapsed() < MIN_REFRESH_INTERVAL)
    }

    fn lookup(&self, kid: &str, ttl: Duration) -> KeyLookup {
        let outage = self.recently_attempted() && self.last_error.is_some();

        match self.keys.peek(kid) {
            Some(key) if self.is_fresh(ttl) || outage => {
                KeyLookup::Hit(key.clone(), self.issuer.clone())
            }
            Some(_) => KeyLookup::Refresh,
            None if self.recently_attempted() => KeyLookup::Miss(
                self.last_error
                    .clone()
                    .unwrap_or_else(|| AuthError::UnknownSigningKey(kid.to_string())),
            ),
            None => KeyLookup::Refresh,
        }
    }

    /// Drop every previously published key; only the new set validates
    fn replace(&mut self, issuer: String, keys: Vec<(String, DecodingKey)>) {
        self.issuer = issuer;
        self.keys.clear();
        for (kid, key) in keys {
            self.keys.put(kid, key);
        }
        self.fetched_at = Some(Instant::now());
        self.last_error = None;
    }
}

/// Bearer token validator bound to one authority.
///
/// Signing keys come from the authority's discovery document and are cached;
/// everything else about a request is validated from the token alone.
pub struct TokenValidator {
    endpoints: IdentityEndpoints,
    settings: ValidatorSettings,
    http_client: Client,
    signing_keys: RwLock<SigningKeys>,
    refresh_lock: Mutex<()>,
}

impl fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenValidator")
            .field("authority", &self.endpoints.authority)
            .field("audiences", &self.endpoints.audiences)
            .field("settings", &self.settings)
            .finish()
    }
}

impl TokenValidator {
    pub fn new(
        endpoints: IdentityEndpoints,
        settings: ValidatorSettings,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("webapi-host/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_http_client(endpoints, settings, http_client))
    }

    pub fn with_http_client(
        endpoints: IdentityEndpoints,
        settings: ValidatorSettings,
        http_client: Client,
    ) -> Self {
        let capacity = NonZeroUsize::new(KEY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        let signing_keys = SigningKeys {
            issuer: endpoints.authority.clone(),
            keys: LruCache::new(capacity),
            fetched_at: None,
            attempted_at: None,
            last_error: None,
        };

        Self {
            endpoints,
            settings,
            http_client,
            signing_keys: RwLock::new(signing_keys),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn endpoints(&self) -> &IdentityEndpoints {
        &self.endpoints
    }

    /// Validate a bearer token and return the caller it identifies.
    ///
    /// Checks, in order: RS256 header with a key id, signature against the
    /// authority's published keys, expiry and not-before with clock skew,
    /// audience, then issuer.
    pub async fn validate_token(&self, token: &str) -> Result<Principal, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("malformed header: {}", e)))?;

        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing key id".to_string()))?;

        let (key, issuer_template) = self.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.settings.clock_skew_seconds;
        validation.validate_nbf = true;
        validation.set_audience(self.endpoints.audiences.as_slice());
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);

        let claims = decode::<AccessTokenClaims>(token, &key, &validation)
            .map_err(map_jwt_error)?
            .claims;

        let expected = expected_issuer(&issuer_template, claims.tid.as_deref()).ok_or_else(|| {
            AuthError::InvalidIssuer {
                expected: issuer_template.clone(),
                actual: claims.iss.clone(),
            }
        })?;
        if claims.iss != expected {
            return Err(AuthError::InvalidIssuer {
                expected,
                actual: claims.iss,
            });
        }

        let subject = claims
            .sub
            .or_else(|| claims.oid.clone())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::InvalidToken("missing subject".to_string()))?;

        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::InvalidToken("exp out of range".to_string()))?;

        let scopes = claims
            .scp
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        debug!(subject = %subject, kid = %kid, "Token validated");

        Ok(Principal {
            subject,
            object_id: claims.oid,
            tenant_id: claims.tid,
            name: claims.name,
            scopes,
            roles: claims.roles,
            expires_at,
        })
    }

    /// Key for `kid` plus the issuer published alongside it
    async fn signing_key(&self, kid: &str) -> Result<(DecodingKey, String), AuthError> {
        let ttl = self.settings.metadata_refresh;

        let lookup = self.signing_keys.read().await.lookup(kid, ttl);
        if let Some(result) = self.resolve_lookup(lookup, kid) {
            return result;
        }

        // One refresh at a time; waiters reuse its outcome
        let _refreshing = self.refresh_lock.lock().await;
        let lookup = self.signing_keys.read().await.lookup(kid, ttl);
        if let Some(result) = self.resolve_lookup(lookup, kid) {
            return result;
        }

        let fetched = self.fetch_signing_keys().await;

        let mut cache = self.signing_keys.write().await;
        cache.attempted_at = Some(Instant::now());
        match fetched {
            Ok((issuer, keys)) => {
                let count = keys.len();
                cache.replace(issuer, keys);
                info!(issuer = %cache.issuer, keys_count = count, "Signing keys refreshed");

                match cache.keys.peek(kid) {
                    Some(key) => Ok((key.clone(), cache.issuer.clone())),
                    None => {
                        warn!(kid = %kid, error_type = "unknown_kid", "Token signed with unpublished key");
                        Err(AuthError::UnknownSigningKey(kid.to_string()))
                    }
                }
            }
            Err(e) => {
                cache.last_error = Some(e.clone());
                // Keep serving with the last known keys while the provider is unreachable
                match cache.keys.peek(kid) {
                    Some(key) => {
                        warn!(
                            error = %e,
                            kid = %kid,
                            "Metadata refresh failed, using cached signing key"
                        );
                        Ok((key.clone(), cache.issuer.clone()))
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// `None` when the cache cannot answer and a refresh is due
    fn resolve_lookup(
        &self,
        lookup: KeyLookup,
        kid: &str,
    ) -> Option<Result<(DecodingKey, String), AuthError>> {
        match lookup {
            KeyLookup::Hit(key, issuer) => Some(Ok((key, issuer))),
            KeyLookup::Miss(error) => {
                warn!(
                    kid = %kid,
                    error = %error,
                    error_type = error.error_type(),
                    "Signing key unavailable, refresh attempted recently"
                );
                Some(Err(error))
            }
            KeyLookup::Refresh => None,
        }
    }

    /// Fetch the discovery document and its JWKS
    async fn fetch_signing_keys(&self) -> Result<(String, Vec<(String, DecodingKey)>), AuthError> {
        let metadata: OpenIdMetadata = self.fetch_json(&self.endpoints.metadata_address).await?;
        let jwks: JwksResponse = self.fetch_json(&metadata.jwks_uri).await?;

        let keys = parse_signing_keys(jwks);
        if keys.is_empty() {
            warn!(
                jwks_uri = %metadata.jwks_uri,
                error_type = "no_signing_keys",
                "JWKS contained no usable RSA signing keys"
            );
            return Err(AuthError::MetadataUnavailable(
                "no usable signing keys".to_string(),
            ));
        }

        debug!(jwks_uri = %metadata.jwks_uri, keys_count = keys.len(), "Fetched JWKS");
        let issuer = metadata
            .issuer
            .unwrap_or_else(|| self.endpoints.authority.clone());
        Ok((issuer, keys))
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AuthError> {
        debug!(url = %url, "Fetching identity provider metadata");

        let response = self.http_client.get(url).send().await.map_err(|e| {
            warn!(
                error = %e,
                url = %url,
                error_type = "http_request_failed",
                "Failed to reach identity provider"
            );
            AuthError::MetadataUnavailable(format!("request to {} failed: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                status = %status,
                url = %url,
                error_type = "metadata_status",
                "Identity provider returned non-2xx status"
            );
            return Err(AuthError::MetadataUnavailable(format!(
                "{} returned status {}",
                url, status
            )));
        }

        response.json().await.map_err(|e| {
            warn!(
                error = %e,
                url = %url,
                error_type = "json_parse_failed",
                "Failed to parse identity provider response"
            );
            AuthError::MetadataUnavailable(format!("invalid document at {}: {}", url, e))
        })
    }
}

fn parse_signing_keys(jwks: JwksResponse) -> Vec<(String, DecodingKey)> {
    jwks.keys
        .into_iter()
        .filter(|k| k.kty == "RSA" && k.key_use.as_deref().map_or(true, |u| u == "sig"))
        .filter_map(|k| {
            let (kid, n, e) = (k.kid?, k.n?, k.e?);
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => Some((kid, key)),
                Err(err) => {
                    warn!(kid = %kid, error = %err, "Failed to parse JWK");
                    None
                }
            }
        })
        .collect()
}

/// Issuer a token must carry; multi-tenant templates take the token's own tenant
fn expected_issuer(template: &str, tenant_id: Option<&str>) -> Option<String> {
    if template.contains(TENANT_PLACEHOLDER) {
        tenant_id
            .filter(|t| !t.is_empty())
            .map(|t| template.replace(TENANT_PLACEHOLDER, t))
    } else {
        Some(template.to_string())
    }
}

fn map_jwt_error(error: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    match error.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthError::InvalidToken(format!("missing required claim '{}'", claim))
        }
        _ => AuthError::InvalidToken(error.to_string()),
    }
}
