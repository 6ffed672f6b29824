//! Network URL constants for the Integrate API.

/// Default login (single sign-on) base URL.
pub const DEFAULT_LOGIN_URL: &str =
    "https://signin.definedgesecurities.com/auth/realms/debroking/dsbpkc/";

/// Default REST API base URL.
pub const DEFAULT_API_URL: &str = "https://integrate.definedgesecurities.com/dart/v1/";

/// Default streaming endpoint.
pub const DEFAULT_WS_URL: &str = "wss://trade.definedgesecurities.com/NorenWSTRTP/";
