//! OpenID Connect protocol: authorization URLs, redirect parsing, token
//! exchange and ID token verification.

pub mod exchange;
pub mod flow;
pub mod redirect;
pub mod token;

pub use exchange::TokenExchanger;
pub use flow::{ResponseLocation, build_authorization_url, build_authorization_url_with_state};
pub use redirect::{AuthorizationResult, ImplicitTokens, is_redirect};
pub use token::{
    Audience, IdTokenClaims, IdTokenVerifier, TokenKind, TokenSet, VerifiedTokenSet,
    decode_claims, is_usable_id_token,
};
