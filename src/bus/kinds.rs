/// Standard topics (namespace-prefixed)
///
/// Topics follow the format `<entity>.<action>` and double as routing keys
/// on publish and binding keys on subscribe.
pub struct Topic;

impl Topic {
    // ========================================================================
    // Event lifecycle
    // ========================================================================
    pub const EVENT_CREATED: &'static str = "event.created";

    // ========================================================================
    // Location lifecycle
    // ========================================================================
    pub const LOCATION_CREATED: &'static str = "location.created";

    // ========================================================================
    // Wildcards (binding keys only)
    // ========================================================================
    pub const ALL_EVENTS: &'static str = "event.#";
    pub const ALL: &'static str = "#";
}
