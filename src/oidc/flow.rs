//! Authorization request URLs for the three OpenID Connect flows.
//!
//! - Authorization Code: `response_type=code`, every token comes from the
//!   token endpoint.
//! - Implicit: `response_type=id_token token`, every token comes back in the
//!   redirect fragment and no refresh token can be obtained.
//! - Hybrid: `response_type=code id_token`, the code and an ID token come
//!   back in the redirect; access and refresh tokens are fetched with the code.

use tracing::debug;
use url::Url;

use crate::config::{ClientConfig, FlowType};
use crate::error::OidcError;

/// Where the authorization endpoint puts its response parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLocation {
    Query,
    Fragment,
}

impl FlowType {
    /// Value of the `response_type` parameter.
    pub const fn response_type(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "code",
            Self::Implicit => "id_token token",
            Self::Hybrid => "code id_token",
        }
    }

    pub const fn response_location(self) -> ResponseLocation {
        match self {
            Self::AuthorizationCode => ResponseLocation::Query,
            Self::Implicit | Self::Hybrid => ResponseLocation::Fragment,
        }
    }

    /// Whether the flow ends with a code exchange at the token endpoint.
    pub const fn exchanges_code(self) -> bool {
        !matches!(self, Self::Implicit)
    }
}

/// Build the authorization endpoint URL for `flow`.
pub fn build_authorization_url(config: &ClientConfig, flow: FlowType) -> Result<Url, OidcError> {
    build_authorization_url_with_state(config, flow, None)
}

/// Build the authorization endpoint URL, optionally carrying a `state` value.
///
/// `scope` and `redirect_uri` are always sent. `prompt=consent` is used when
/// the scopes ask for offline access so the provider issues a refresh token;
/// otherwise `prompt=login` forces the user to pick the account explicitly.
pub fn build_authorization_url_with_state(
    config: &ClientConfig,
    flow: FlowType,
    state: Option<&str>,
) -> Result<Url, OidcError> {
    config.validate()?;

    let mut url = Url::parse(&config.authorization_endpoint)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", flow.response_type())
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("scope", &config.scope_param());

        let prompt = if config.requests_offline_access() {
            "consent"
        } else {
            "login"
        };
        query.append_pair("prompt", prompt);

        if !config.display.is_empty() {
            query.append_pair("display", &config.display);
        }
        if let Some(state) = state.filter(|s| !s.is_empty()) {
            query.append_pair("state", state);
        }
    }

    debug!(%flow, "Built authorization URL");
    Ok(url)
}
