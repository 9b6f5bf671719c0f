// -
// Database namespaces

/// Sled tree holding resource records and store metadata
pub(crate) const RESOURCE_TREE: &str = "_resource_tree";

/// Sled entry key namespaces
pub(crate) const META_KEY_PREFIX: &str = "_meta/";
pub(crate) const META_KEY_REVISION: &str = "_meta/revision";

/// Separator between kind and id in record keys
pub(crate) const KEY_SEPARATOR: char = '/';

// -
// Resource model

/// Wildcard kind accepted by watch subscriptions
pub const KIND_ALL: &str = "all";

/// Annotation marking who introduced a resource
pub const ANNOTATION_ORIGIN: &str = "origin";

/// `origin` value of resources a node agent discovered on its host
pub const ORIGIN_SYNC: &str = "sync";

/// Length of server generated resource ids
pub(crate) const GENERATED_ID_LEN: usize = 21;

// -
// Transport

pub(crate) const HTTP_RESOURCES_PATH: &str = "resources";
pub(crate) const HTTP_EVENTS_PATH: &str = "events";
pub(crate) const SSE_EVENT_RESOURCE: &str = "resource";
pub(crate) const SSE_EVENT_ERROR: &str = "error";
pub(crate) const GRPC_WATCH_FORWARD_BUFFER: usize = 16;
