//! Service descriptors.
//!
//! A [`ServiceMap`] lists the APIs and messages a peer is known to serve,
//! each mapped to an opaque schema identifier. When one is configured, calls
//! to APIs absent from it fail locally without touching the network.

use std::collections::HashMap;

/// Schema identifiers of one API.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiSchema {
    /// Request schema identifier.
    pub req: String,
    /// Response schema identifier.
    pub res: String,
}

/// Names served by the remote peer.
///
/// # Examples
///
/// ```
/// use tsrpc::service::ServiceMap;
///
/// let service = ServiceMap::new()
///     .with_api("user/Login", "ReqLogin", "ResLogin")
///     .with_msg("Chat", "MsgChat");
/// assert!(service.has_api("user/Login"));
/// assert!(!service.has_api("user/login"));
/// assert!(service.has_msg("Chat"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceMap {
    apis: HashMap<String, ApiSchema>,
    msgs: HashMap<String, String>,
}

impl ServiceMap {
    /// Create an empty descriptor.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Declare an API.
    #[must_use]
    pub fn with_api(
        mut self,
        name: impl Into<String>,
        req: impl Into<String>,
        res: impl Into<String>,
    ) -> Self {
        self.apis.insert(
            name.into(),
            ApiSchema {
                req: req.into(),
                res: res.into(),
            },
        );
        self
    }

    /// Declare a message.
    #[must_use]
    pub fn with_msg(mut self, name: impl Into<String>, schema: impl Into<String>) -> Self {
        self.msgs.insert(name.into(), schema.into());
        self
    }

    /// Schemas of `name`, if declared.
    #[must_use]
    pub fn api(&self, name: &str) -> Option<&ApiSchema> { self.apis.get(name) }

    /// Schema identifier of message `name`, if declared.
    #[must_use]
    pub fn msg(&self, name: &str) -> Option<&str> { self.msgs.get(name).map(String::as_str) }

    /// Returns `true` if the API is declared.
    #[must_use]
    pub fn has_api(&self, name: &str) -> bool { self.apis.contains_key(name) }

    /// Returns `true` if the message is declared.
    #[must_use]
    pub fn has_msg(&self, name: &str) -> bool { self.msgs.contains_key(name) }
}
