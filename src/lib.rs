pub mod clock;
pub mod config;
pub mod cookie;
pub mod credentials;
pub mod csrf;
pub mod error;
pub mod flow;
pub mod http_client;
pub mod oauth;
pub mod oidc;
pub mod pkce;
pub mod rbac;
pub mod session;
pub mod state;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AuthConfig, SessionStrategy};
pub use cookie::{CookieNames, SameSite, SetCookie};
pub use credentials::{CredentialsAuthorizer, InMemoryUserStore, StoredCredentials, UserStore};
pub use csrf::{CsrfGuard, CsrfSubmission};
pub use error::{AuthError, Result};
pub use flow::{RouteOutcome, SessionReply, SignInFlow, SignedIn};
pub use http_client::{HttpClientError, HttpRequest, HttpResponse, InMemoryHttpClient, OAuthHttpClient};
#[cfg(feature = "reqwest")]
pub use http_client::ReqwestHttpClient;
pub use oauth::{ClientConfig, OAuthEngine, ProviderConfig, TokenSet, UserIdentity};
pub use oidc::{DiscoveryCache, DiscoveryDocument, clear_discovery_cache};
pub use pkce::{PkcePair, generate_pkce, verify_code_challenge};
pub use rbac::{RbacUser, Resource, RoleGraph};
pub use session::{CookieSessionCodec, CookieSessionStore, KvSessionStore, Session, SessionStore};
pub use state::{OAuthState, StateManager};
pub use storage::{InMemoryStorage, Storage};
