const fn server_host() -> &'static str {
    if let Some(host) = option_env!("GOAL_SERVER_HOST") {
        host
    } else {
        "localhost"
    }
}

const fn server_port() -> u16 {
    if let Some(port) = option_env!("GOAL_SERVER_PORT") {
        const_str::parse!(port, u16)
    } else {
        8080
    }
}

const fn server_secure() -> bool {
    if let Some(secure) = option_env!("GOAL_SERVER_SECURE") {
        const_str::eq_ignore_ascii_case!(secure, "true") || const_str::equal!(secure, "1")
    } else {
        false
    }
}

const fn server_ws_proto() -> &'static str {
    if server_secure() { "wss" } else { "ws" }
}

const fn server_http_proto() -> &'static str {
    if server_secure() { "https" } else { "http" }
}

const SERVER_HOST: &str = server_host();
const SERVER_PORT: u16 = server_port();
const SERVER_WS_PROTO: &str = server_ws_proto();
const SERVER_HTTP_PROTO: &str = server_http_proto();

const SERVER_SOCKET: &str = const_str::concat!(SERVER_HOST, ":", SERVER_PORT);

/// Persistent connection endpoint, baked in at build time
pub const DEFAULT_SOCKET_URL: &str =
    const_str::concat!(SERVER_WS_PROTO, "://", SERVER_SOCKET, "/ws");
/// Base of the request/response endpoints, baked in at build time
pub const DEFAULT_API_URL: &str =
    const_str::concat!(SERVER_HTTP_PROTO, "://", SERVER_SOCKET, "/api/");
