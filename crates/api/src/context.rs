use orderflow_auth::Actor;

/// Acting identity for a request, taken from the `x-acting-*` headers.
///
/// Present on every route behind the actor middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: Actor,
}

impl ActorContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}
