//! Parsing the redirect URI the authorization endpoint sends the user back to.

use std::collections::HashMap;

use tracing::{debug, warn};
use url::Url;

use super::token::TokenSet;
use crate::config::{ClientConfig, FlowType};
use crate::error::OidcError;

/// Error code the provider uses when the user declines.
const ACCESS_DENIED: &str = "access_denied";

/// Outcome of an interactive authorization, as read from the redirect URI.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationResult {
    /// Authorization code flow.
    Code(String),
    /// Implicit flow: every token is in the fragment.
    ImplicitTokens(ImplicitTokens),
    /// Hybrid flow: a code to exchange plus a front-channel ID token.
    HybridTokens { code: String, id_token: String },
    /// The provider reported an error.
    Error { code: String, description: String },
    /// The user declined to authorize the app.
    Denied,
}

/// Tokens delivered in an implicit-flow redirect fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitTokens {
    pub access_token: String,
    pub id_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: Option<String>,
}

impl ImplicitTokens {
    /// Parse an implicit-flow fragment (`access_token=...&id_token=...`).
    pub fn from_fragment(fragment: &str) -> Result<Self, OidcError> {
        let params = parse_pairs(fragment);

        let required = |name: &str| {
            params
                .get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| OidcError::MalformedRedirect(format!("fragment has no {name}")))
        };

        let access_token = required("access_token")?;
        let id_token = required("id_token")?;
        let token_type = required("token_type")?;
        let expires_in = required("expires_in")?
            .parse::<i64>()
            .map_err(|e| OidcError::MalformedRedirect(format!("invalid expires_in: {e}")))?;

        Ok(Self {
            access_token,
            id_token,
            token_type,
            expires_in,
            scope: params.get("scope").cloned(),
        })
    }

    /// Encode back into fragment form.
    pub fn to_fragment(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer
            .append_pair("access_token", &self.access_token)
            .append_pair("id_token", &self.id_token)
            .append_pair("token_type", &self.token_type)
            .append_pair("expires_in", &self.expires_in.to_string());
        if let Some(scope) = &self.scope {
            serializer.append_pair("scope", scope);
        }
        serializer.finish()
    }

    pub fn into_token_set(self) -> TokenSet {
        TokenSet {
            id_token: Some(self.id_token),
            access_token: self.access_token,
            refresh_token: None,
            token_type: self.token_type,
            expires_in: Some(self.expires_in),
            scope: self.scope,
        }
    }
}

/// Whether `uri` is the configured redirect URI (as opposed to an
/// intermediate page of the provider's login UI).
///
/// Scheme, host, port and path must match exactly; query and fragment carry
/// the response and are ignored.
pub fn is_redirect(config: &ClientConfig, uri: &str) -> bool {
    let (Ok(expected), Ok(actual)) = (Url::parse(&config.redirect_uri), Url::parse(uri)) else {
        return false;
    };
    actual.scheme() == expected.scheme()
        && actual.host_str() == expected.host_str()
        && actual.port_or_known_default() == expected.port_or_known_default()
        && actual.path() == expected.path()
}

impl AuthorizationResult {
    /// Read the authorization response out of a redirect URI.
    ///
    /// Provider errors are returned as `Ok(Error | Denied)`; a redirect that
    /// lacks the parameters `flow` requires is a `MalformedRedirect`.
    pub fn parse(redirect_uri: &str, flow: FlowType) -> Result<Self, OidcError> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| OidcError::MalformedRedirect(format!("'{redirect_uri}': {e}")))?;

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let fragment = url.fragment().unwrap_or_default();
        let fragment_params = parse_pairs(fragment);

        let error_params = if query.contains_key("error") {
            Some(&query)
        } else if fragment_params.contains_key("error") {
            Some(&fragment_params)
        } else {
            None
        };
        if let Some(params) = error_params {
            let code = params.get("error").cloned().unwrap_or_default();
            if code == ACCESS_DENIED {
                debug!("User declined authorization");
                return Ok(Self::Denied);
            }
            let description = params.get("error_description").cloned().unwrap_or_default();
            warn!(error = %code, description = %description, "Authorization endpoint returned an error");
            return Ok(Self::Error { code, description });
        }

        match flow {
            FlowType::Implicit => {
                if fragment.is_empty() {
                    return Err(OidcError::MalformedRedirect(
                        "redirect has no fragment; can't extract tokens".to_string(),
                    ));
                }
                Ok(Self::ImplicitTokens(ImplicitTokens::from_fragment(fragment)?))
            }
            FlowType::Hybrid => {
                let lookup = |name: &str| {
                    fragment_params
                        .get(name)
                        .or_else(|| query.get(name))
                        .filter(|v| !v.is_empty())
                        .cloned()
                };
                match (lookup("code"), lookup("id_token")) {
                    (Some(code), Some(id_token)) => Ok(Self::HybridTokens { code, id_token }),
                    _ => Err(OidcError::MalformedRedirect(
                        "redirect lacks code or id_token; can't request tokens".to_string(),
                    )),
                }
            }
            FlowType::AuthorizationCode => query
                .get("code")
                .filter(|c| !c.is_empty())
                .cloned()
                .map(Self::Code)
                .ok_or_else(|| {
                    OidcError::MalformedRedirect(
                        "redirect has no code param; can't extract authorization code".to_string(),
                    )
                }),
        }
    }
}

fn parse_pairs(encoded: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(encoded.as_bytes())
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REDIRECT: &str = "app://oidcsample.example.com";

    #[test]
    fn test_code_flow() {
        let result =
            AuthorizationResult::parse(&format!("{REDIRECT}?code=abc123&state=s"), FlowType::AuthorizationCode)
                .unwrap();
        assert_eq!(result, AuthorizationResult::Code("abc123".into()));
    }

    #[test]
    fn test_code_flow_missing_code() {
        let err = AuthorizationResult::parse(&format!("{REDIRECT}?state=s"), FlowType::AuthorizationCode)
            .unwrap_err();
        assert!(matches!(err, OidcError::MalformedRedirect(_)));
    }

    #[test]
    fn test_access_denied_is_denied() {
        let result = AuthorizationResult::parse(
            &format!("{REDIRECT}?error=access_denied&error_description=nope"),
            FlowType::Hybrid,
        )
        .unwrap();
        assert_eq!(result, AuthorizationResult::Denied);
    }

    #[test]
    fn test_provider_error() {
        let result = AuthorizationResult::parse(
            &format!("{REDIRECT}#error=temporarily_unavailable&error_description=Try+later"),
            FlowType::Implicit,
        )
        .unwrap();
        assert_eq!(
            result,
            AuthorizationResult::Error {
                code: "temporarily_unavailable".into(),
                description: "Try later".into(),
            }
        );
    }

    #[test]
    fn test_hybrid_fragment() {
        let result = AuthorizationResult::parse(
            &format!("{REDIRECT}#code=c0de&id_token=a.b.c&state=s"),
            FlowType::Hybrid,
        )
        .unwrap();
        assert_eq!(
            result,
            AuthorizationResult::HybridTokens {
                code: "c0de".into(),
                id_token: "a.b.c".into(),
            }
        );
    }

    #[test]
    fn test_hybrid_missing_id_token() {
        let err = AuthorizationResult::parse(&format!("{REDIRECT}#code=c0de"), FlowType::Hybrid)
            .unwrap_err();
        assert!(matches!(err, OidcError::MalformedRedirect(_)));
    }

    #[test]
    fn test_implicit_fragment_round_trip() {
        let tokens = ImplicitTokens {
            access_token: "SlAV32hkKG".into(),
            id_token: "eyJ0.eyJz.sig".into(),
            token_type: "Bearer".into(),
            expires_in: 3600,
            scope: Some("openid profile".into()),
        };
        let uri = format!("{REDIRECT}#{}", tokens.to_fragment());

        let AuthorizationResult::ImplicitTokens(parsed) =
            AuthorizationResult::parse(&uri, FlowType::Implicit).unwrap()
        else {
            panic!("expected implicit tokens");
        };
        let set = parsed.into_token_set();
        assert_eq!(set.access_token, "SlAV32hkKG");
        assert_eq!(set.id_token.as_deref(), Some("eyJ0.eyJz.sig"));
        assert_eq!(set.token_type, "Bearer");
        assert_eq!(set.expires_in, Some(3600));
        assert_eq!(set.scope.as_deref(), Some("openid profile"));
        assert!(set.refresh_token.is_none());
    }

    #[test]
    fn test_implicit_requires_expires_in() {
        let err = AuthorizationResult::parse(
            &format!("{REDIRECT}#access_token=a&id_token=b&token_type=Bearer"),
            FlowType::Implicit,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expires_in"));

        let err = AuthorizationResult::parse(
            &format!("{REDIRECT}#access_token=a&id_token=b&token_type=Bearer&expires_in=soon"),
            FlowType::Implicit,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid expires_in"));
    }

    #[test]
    fn test_implicit_without_fragment() {
        let err = AuthorizationResult::parse(REDIRECT, FlowType::Implicit).unwrap_err();
        assert!(matches!(err, OidcError::MalformedRedirect(_)));
    }

    #[test]
    fn test_is_redirect() {
        let config = ClientConfig {
            redirect_uri: REDIRECT.into(),
            ..ClientConfig::default()
        };
        assert!(is_redirect(&config, &format!("{REDIRECT}?code=x")));
        assert!(!is_redirect(&config, "https://idp.example.com/login"));
        assert!(!is_redirect(&config, "not a uri"));
    }

    #[test]
    fn test_is_redirect_rejects_lookalike_hosts_and_paths() {
        let config = ClientConfig {
            redirect_uri: "app://oidcsample.example.com/callback".into(),
            ..ClientConfig::default()
        };
        assert!(is_redirect(&config, "app://oidcsample.example.com/callback#id_token=x"));
        assert!(!is_redirect(&config, "app://oidcsample.example.com.evil/callback#id_token=x"));
        assert!(!is_redirect(&config, "app://oidcsample.example.com/callback-evil?code=x"));
        assert!(!is_redirect(&config, "https://oidcsample.example.com/callback?code=x"));
    }
}
