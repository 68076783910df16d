//! ASCOM Alpaca facade: HTTP surface, auth, authorization, sessions, proxies

pub mod alpaca;
pub mod auth;
pub mod authorization;
pub mod devices;
pub mod discovery;
pub mod proxy;
pub mod server;
pub mod session;

pub use alpaca::AlpacaResponse;
pub use auth::{AscomAuth, AuthenticatedUser};
pub use authorization::{DeviceAction, PermissionLevel, TelescopeAuthorizer};
pub use devices::{AscomDevice, BackendMode, DeviceRegistry};
pub use proxy::{BusProxy, DeviceProxy, DirectProxy, NetworkProxy, ProxyPool, RoutingStrategy};
pub use server::{router, AscomGateway, GatewayState};
pub use session::{AscomSession, SessionManager, SessionStatus};
