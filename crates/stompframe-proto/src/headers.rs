//! Well-known header names and protocol constants.

/// Protocol version advertised in `CONNECTED`.
pub const PROTOCOL_VERSION: &str = "1.2";

/// `CONNECT`: user name.
pub const LOGIN: &str = "login";
/// `CONNECT`: password.
pub const PASSCODE: &str = "passcode";
/// `CONNECTED`: negotiated protocol version.
pub const VERSION: &str = "version";

/// Channel a frame is addressed to (`SUBSCRIBE`, `SEND`, `MESSAGE`).
pub const DESTINATION: &str = "destination";
/// Client-chosen subscription id (`SUBSCRIBE`, `UNSUBSCRIBE`).
pub const ID: &str = "id";
/// Correlation id the client wants echoed back in a `RECEIPT`.
pub const RECEIPT: &str = "receipt";
/// `RECEIPT`/`ERROR`: echo of the request's `receipt` header.
pub const RECEIPT_ID: &str = "receipt-id";

/// `MESSAGE`: server-assigned unique message id.
pub const MESSAGE_ID: &str = "message-id";
/// `MESSAGE`: subscription id of the recipient.
pub const SUBSCRIPTION: &str = "subscription";

/// `ERROR`: short human-readable description.
pub const MESSAGE: &str = "message";
