/// Common surface of everything written to the outbox.
///
/// The type tag is persisted next to the JSON payload and must never change
/// for an existing kind.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;
}
