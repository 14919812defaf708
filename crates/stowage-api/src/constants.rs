/// API version segment used in route prefixes and the OpenAPI document
pub const API_VERSION: &str = "v0";

/// Prefix for every protocol route
pub const API_PREFIX: &str = "/api/v0";

/// Header carrying the caller's owner id, set by the identity gate in front of us
pub const OWNER_HEADER: &str = "x-owner-id";

/// Longest owner id accepted from the header
pub const MAX_OWNER_LEN: usize = 128;

/// Extra room on top of the chunk size for the request body limit
pub const BODY_LIMIT_SLACK_BYTES: usize = 64 * 1024;
