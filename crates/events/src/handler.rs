/// Execute an aggregate command in place: decide, then apply every decided event.
///
/// No persistence or publication happens here; the infra `CommandDispatcher`
/// owns that pipeline. Useful for tests and for previewing a command against an
/// already rehydrated aggregate.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: orderflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
